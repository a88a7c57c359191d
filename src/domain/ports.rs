//! Domain Ports - Core trait definitions for the storage provider
//!
//! [`StorageProvider`] is the boundary the volume-lifecycle layer calls. It is
//! implemented by a single-appliance provider and by the failover cluster that
//! wraps several of them.

use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Filesystems
// =============================================================================

/// Point-in-time snapshot of an appliance filesystem (dataset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filesystem {
    /// Slash-delimited path, unique within the appliance
    pub path: String,
    /// Where the filesystem is mounted on the appliance
    pub mount_point: String,
    /// Whether an NFS share exists for this filesystem
    pub shared_over_nfs: bool,
    /// Quota in bytes, 0 when unlimited
    pub quota_size: u64,
}

/// Extra creation parameters merged into the create request body
pub type FilesystemParams = serde_json::Map<String, serde_json::Value>;

/// Access granted to `everyone@` on a filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclRuleSet {
    ReadOnly,
    ReadWrite,
}

impl AclRuleSet {
    /// Appliance permission set for this rule set
    pub fn permissions(self) -> &'static [&'static str] {
        match self {
            AclRuleSet::ReadOnly => &["read_set"],
            AclRuleSet::ReadWrite => &["full_set"],
        }
    }
}

impl std::fmt::Display for AclRuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AclRuleSet::ReadOnly => write!(f, "read-only"),
            AclRuleSet::ReadWrite => write!(f, "read-write"),
        }
    }
}

// =============================================================================
// Pools
// =============================================================================

/// Pool as reported by the appliance, used for health checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    pub health: Option<String>,
    pub status: Option<String>,
}

// =============================================================================
// Storage Provider Port
// =============================================================================

/// Port for appliance storage operations
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Exchange credentials for a fresh auth token
    async fn log_in(&self, ctx: &RequestContext) -> Result<()>;

    /// Pools with their health and status fields.
    ///
    /// `get_pools` is derived from this same request.
    async fn get_pool_status(&self, ctx: &RequestContext) -> Result<Vec<Pool>>;

    /// Names of all pools
    async fn get_pools(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self
            .get_pool_status(ctx)
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Filesystem by exact path; `None` when it does not exist
    async fn get_filesystem(&self, ctx: &RequestContext, path: &str)
        -> Result<Option<Filesystem>>;

    /// Descendants of `parent`, excluding `parent` itself
    async fn get_filesystems(&self, ctx: &RequestContext, parent: &str)
        -> Result<Vec<Filesystem>>;

    async fn create_filesystem(
        &self,
        ctx: &RequestContext,
        path: &str,
        params: FilesystemParams,
    ) -> Result<()>;

    async fn destroy_filesystem(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    async fn create_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    async fn delete_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    async fn set_filesystem_acl(
        &self,
        ctx: &RequestContext,
        path: &str,
        rule_set: AclRuleSet,
    ) -> Result<()>;

    /// Single check of an asynchronous job; `Ok(false)` while it is running
    async fn is_job_done(&self, ctx: &RequestContext, job_id: &str) -> Result<bool>;

    /// Management address this provider talks to
    fn address(&self) -> &str;
}

pub type StorageProviderRef = Arc<dyn StorageProvider>;
