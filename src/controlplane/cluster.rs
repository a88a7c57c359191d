//! Cluster Provider
//!
//! Presents the [`StorageProvider`] contract over an ordered list of redundant
//! appliance endpoints. Operations go to the active endpoint; when it fails
//! with an endpoint failure the remaining endpoints are tried in order, each
//! standby being health-checked before it is used.

use crate::context::RequestContext;
use crate::domain::ports::{
    AclRuleSet, Filesystem, FilesystemParams, Pool, StorageProvider, StorageProviderRef,
};
use crate::error::{EndpointFailure, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

type ProviderFuture<'a, R> = Pin<Box<dyn Future<Output = Result<R>> + Send + 'a>>;

// =============================================================================
// Health Policy
// =============================================================================

/// Decides whether the pools an endpoint reports make it usable
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Pool states (health, or status when health is absent) considered usable
    pub healthy_pool_states: Vec<String>,
    /// Treat an endpoint reporting no pools at all as unhealthy
    pub require_pools: bool,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            healthy_pool_states: vec!["ONLINE".to_string(), "DEGRADED".to_string()],
            require_pools: true,
        }
    }
}

impl HealthPolicy {
    /// `Err` names the first pool in an unusable state
    pub fn evaluate(&self, pools: &[Pool]) -> std::result::Result<(), String> {
        if pools.is_empty() && self.require_pools {
            return Err("no pools reported".to_string());
        }
        for pool in pools {
            let state = pool.health.as_deref().or(pool.status.as_deref());
            if let Some(state) = state {
                let healthy = self
                    .healthy_pool_states
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(state));
                if !healthy {
                    return Err(format!("pool {} is {}", pool.name, state));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Cluster State
// =============================================================================

/// Last known health of one endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub address: String,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ClusterState {
    active: usize,
    members: Vec<EndpointStatus>,
}

// =============================================================================
// Cluster Provider
// =============================================================================

/// Failover wrapper over N storage providers
pub struct ClusterProvider {
    providers: Vec<StorageProviderRef>,
    policy: HealthPolicy,
    state: RwLock<ClusterState>,
}

impl ClusterProvider {
    /// The first provider starts as the active endpoint
    pub fn new(providers: Vec<StorageProviderRef>, policy: HealthPolicy) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::Configuration(
                "Cluster requires at least one endpoint".into(),
            ));
        }
        let members = providers
            .iter()
            .map(|p| EndpointStatus {
                address: p.address().to_string(),
                healthy: true,
                last_error: None,
                last_checked: None,
            })
            .collect();

        Ok(Self {
            providers,
            policy,
            state: RwLock::new(ClusterState { active: 0, members }),
        })
    }

    pub fn active_endpoint(&self) -> String {
        let state = self.state.read();
        state.members[state.active].address.clone()
    }

    pub fn endpoint_statuses(&self) -> Vec<EndpointStatus> {
        self.state.read().members.clone()
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Probe every endpoint in order and switch away from an unhealthy
    /// active endpoint to the first healthy one
    pub async fn check_health(&self, ctx: &RequestContext) -> Result<Vec<EndpointStatus>> {
        for index in 0..self.providers.len() {
            match self.probe(ctx, index).await {
                Ok(()) => self.record(index, None),
                Err(err) if is_caller_abort(&err) => return Err(err),
                Err(err) => self.record(index, Some(&err)),
            }
        }

        {
            let mut state = self.state.write();
            if !state.members[state.active].healthy {
                if let Some(next) = state.members.iter().position(|m| m.healthy) {
                    info!(
                        "switching active endpoint from {} to {}",
                        state.members[state.active].address, state.members[next].address
                    );
                    state.active = next;
                }
            }
        }

        Ok(self.endpoint_statuses())
    }

    /// Lightweight read plus pool health evaluation
    async fn probe(&self, ctx: &RequestContext, index: usize) -> Result<()> {
        let provider = &self.providers[index];
        let pools = provider.get_pool_status(ctx).await?;
        self.policy.evaluate(&pools).map_err(|reason| Error::Unavailable {
            endpoint: provider.address().to_string(),
            reason,
        })
    }

    fn record(&self, index: usize, err: Option<&Error>) {
        let mut state = self.state.write();
        let member = &mut state.members[index];
        member.healthy = err.is_none();
        member.last_error = err.map(|e| e.to_string());
        member.last_checked = Some(Utc::now());
    }

    fn activate(&self, index: usize) {
        let mut state = self.state.write();
        if state.active != index {
            info!(
                "failover: active endpoint is now {} (was {})",
                state.members[index].address, state.members[state.active].address
            );
            state.active = index;
        }
    }

    /// Run `call` against the active endpoint, failing over in order on
    /// endpoint failures
    async fn dispatch<'f, R, F>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        call: F,
    ) -> Result<R>
    where
        R: Send,
        F: Fn(StorageProviderRef) -> ProviderFuture<'f, R> + Send + Sync,
    {
        let start = self.state.read().active;
        let count = self.providers.len();
        let mut failures = Vec::new();

        for offset in 0..count {
            let index = (start + offset) % count;
            let provider = self.providers[index].clone();
            let address = provider.address().to_string();

            if offset > 0 {
                match self.probe(ctx, index).await {
                    Ok(()) => debug!("{}: standby {} is healthy", operation, address),
                    Err(err) if is_caller_abort(&err) => return Err(err),
                    Err(err) => {
                        warn!("{}: skipping unhealthy endpoint {}: {}", operation, address, err);
                        self.record(index, Some(&err));
                        failures.push(EndpointFailure {
                            endpoint: address,
                            error: err,
                        });
                        continue;
                    }
                }
            }

            match call(provider).await {
                Err(err) if err.is_endpoint_failure() => {
                    warn!("{}: endpoint {} failed: {}", operation, address, err);
                    self.record(index, Some(&err));
                    failures.push(EndpointFailure {
                        endpoint: address,
                        error: err,
                    });
                }
                result => {
                    self.record(index, None);
                    if result.is_ok() {
                        self.activate(index);
                    }
                    return result;
                }
            }
        }

        Err(Error::ClusterUnavailable {
            operation: operation.to_string(),
            failures,
        })
    }
}

impl std::fmt::Debug for ClusterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterProvider")
            .field("state", &*self.state.read())
            .field("policy", &self.policy)
            .finish()
    }
}

fn is_caller_abort(err: &Error) -> bool {
    matches!(err, Error::DeadlineExceeded { .. } | Error::Cancelled { .. })
}

#[async_trait]
impl StorageProvider for ClusterProvider {
    async fn log_in(&self, ctx: &RequestContext) -> Result<()> {
        self.dispatch(ctx, "Login", |p| Box::pin(async move { p.log_in(ctx).await }))
            .await
    }

    async fn get_pool_status(&self, ctx: &RequestContext) -> Result<Vec<Pool>> {
        self.dispatch(ctx, "Get pools", |p| {
            Box::pin(async move { p.get_pool_status(ctx).await })
        })
        .await
    }

    async fn get_filesystem(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Option<Filesystem>> {
        self.dispatch(ctx, "Get filesystem", |p| {
            Box::pin(async move { p.get_filesystem(ctx, path).await })
        })
        .await
    }

    async fn get_filesystems(
        &self,
        ctx: &RequestContext,
        parent: &str,
    ) -> Result<Vec<Filesystem>> {
        self.dispatch(ctx, "Get filesystems", |p| {
            Box::pin(async move { p.get_filesystems(ctx, parent).await })
        })
        .await
    }

    async fn create_filesystem(
        &self,
        ctx: &RequestContext,
        path: &str,
        params: FilesystemParams,
    ) -> Result<()> {
        let params = &params;
        self.dispatch(ctx, "Create filesystem", |p| {
            Box::pin(async move { p.create_filesystem(ctx, path, params.clone()).await })
        })
        .await
    }

    async fn destroy_filesystem(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.dispatch(ctx, "Destroy filesystem", |p| {
            Box::pin(async move { p.destroy_filesystem(ctx, path).await })
        })
        .await
    }

    async fn create_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.dispatch(ctx, "Create NFS share", |p| {
            Box::pin(async move { p.create_nfs_share(ctx, path).await })
        })
        .await
    }

    async fn delete_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.dispatch(ctx, "Delete NFS share", |p| {
            Box::pin(async move { p.delete_nfs_share(ctx, path).await })
        })
        .await
    }

    async fn set_filesystem_acl(
        &self,
        ctx: &RequestContext,
        path: &str,
        rule_set: AclRuleSet,
    ) -> Result<()> {
        self.dispatch(ctx, "Set filesystem ACL", |p| {
            Box::pin(async move { p.set_filesystem_acl(ctx, path, rule_set).await })
        })
        .await
    }

    async fn is_job_done(&self, ctx: &RequestContext, job_id: &str) -> Result<bool> {
        self.dispatch(ctx, "Job status", |p| {
            Box::pin(async move { p.is_job_done(ctx, job_id).await })
        })
        .await
    }

    fn address(&self) -> &str {
        let active = self.state.read().active;
        self.providers[active].address()
    }
}
