//! NexentaStor Storage Provider
//!
//! Filesystem, NFS share, ACL and pool operations against one appliance
//! address. Every request goes through [`NsProvider::request`], which logs in
//! lazily and re-logs in exactly once when the appliance rejects the token.

use super::envelope::{classify, data_list, decode_entry, NefErrorKind, ResponseSchema};
use super::rest::{build_uri, escape_path, RestClient, RestClientConfig, RestResponse, Transport};
use super::session::{Credentials, Session};
use crate::context::RequestContext;
use crate::domain::ports::{AclRuleSet, Filesystem, FilesystemParams, Pool, StorageProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

const FILESYSTEM_FIELDS: &str = "path,quotaSize,mountPoint,sharedOverNfs";
const POOL_FIELDS: &str = "poolName,health,status";

// =============================================================================
// Response Schemas
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilesystemRecord {
    path: String,
    mount_point: String,
    shared_over_nfs: bool,
    #[serde(deserialize_with = "quota_bytes")]
    quota_size: u64,
}

impl ResponseSchema for FilesystemRecord {
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["path", "quotaSize", "mountPoint", "sharedOverNfs"];
}

impl From<FilesystemRecord> for Filesystem {
    fn from(record: FilesystemRecord) -> Self {
        Self {
            path: record.path,
            mount_point: record.mount_point,
            shared_over_nfs: record.shared_over_nfs,
            quota_size: record.quota_size,
        }
    }
}

/// The appliance reports quotas as JSON floats; `null` means no quota
fn quota_bytes<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(0),
        Some(quota) if quota.is_finite() && quota >= 0.0 && quota < u64::MAX as f64 => {
            Ok(quota as u64)
        }
        Some(quota) => Err(D::Error::custom(format!(
            "quotaSize {} is not a byte count",
            quota
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolRecord {
    pool_name: String,
    #[serde(default)]
    health: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl ResponseSchema for PoolRecord {
    const REQUIRED_FIELDS: &'static [&'static str] = &["poolName"];
}

// =============================================================================
// Request Bodies
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NfsShareRequest<'a> {
    filesystem: &'a str,
    anon: &'static str,
    security_contexts: Vec<SecurityContext>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityContext {
    security_modes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct AclRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    principal: &'static str,
    flags: Vec<&'static str>,
    permissions: Vec<&'static str>,
}

// =============================================================================
// Provider
// =============================================================================

/// Arguments for [`NsProvider::new`]
#[derive(Clone)]
pub struct ProviderArgs {
    /// Management address, `scheme://host:port`
    pub address: String,
    pub username: String,
    pub password: String,
    pub transport: RestClientConfig,
}

impl std::fmt::Debug for ProviderArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderArgs")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Storage provider for a single NexentaStor appliance
#[derive(Debug)]
pub struct NsProvider<T: Transport = RestClient> {
    transport: T,
    session: Session,
}

impl NsProvider<RestClient> {
    pub fn new(args: ProviderArgs) -> Result<Self> {
        if args.address.is_empty() {
            return Err(Error::Configuration("NexentaStor address is empty".into()));
        }
        let transport = RestClient::new(&args.address, &args.transport)?;
        debug!("created NexentaStor provider for {}", args.address);
        Ok(Self::with_transport(
            transport,
            Credentials::new(args.username, args.password),
        ))
    }
}

impl<T: Transport> NsProvider<T> {
    pub fn with_transport(transport: T, credentials: Credentials) -> Self {
        Self {
            transport,
            session: Session::new(credentials),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Authenticated request: lazy login, one re-login and retry on a
    /// rejected token
    async fn request(
        &self,
        ctx: &RequestContext,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<RestResponse> {
        self.session.ensure(ctx, &self.transport).await?;

        let observed = self.session.generation();
        let response = self
            .transport
            .send(ctx, method.clone(), path, body.as_ref())
            .await?;
        if !is_auth_failure(&response) {
            return Ok(response);
        }

        info!(
            "{}: token rejected by {}, logging in again",
            operation,
            self.transport.address()
        );
        self.session
            .refresh(ctx, &self.transport, observed)
            .await?;

        let response = self.transport.send(ctx, method, path, body.as_ref()).await?;
        if is_auth_failure(&response) {
            let reason = classify(response.status, &response.body)
                .map(|e| e.message)
                .unwrap_or_else(|| "token rejected after re-login".to_string());
            return Err(Error::Auth {
                endpoint: self.transport.address().to_string(),
                username: self.session.username().to_string(),
                reason,
            });
        }
        Ok(response)
    }

    /// Authenticated request whose non-2xx answers become errors
    async fn call(
        &self,
        ctx: &RequestContext,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let response = self.request(ctx, operation, method, path, body).await?;
        if response.status.is_success() {
            return Ok(response.body);
        }
        Err(self.status_error(operation, response))
    }

    fn status_error(&self, operation: &str, response: RestResponse) -> Error {
        let endpoint = self.transport.address().to_string();
        let nef = classify(response.status, &response.body);

        if is_gateway_failure(response.status) {
            let detail = nef
                .map(|e| e.to_string())
                .unwrap_or_else(|| response.body.to_string());
            return Error::Unavailable {
                endpoint,
                reason: format!("{} returned {}: {}", operation, response.status, detail),
            };
        }

        match nef {
            Some(source) => Error::Appliance {
                endpoint,
                operation: operation.to_string(),
                source,
            },
            None => Error::Protocol {
                endpoint,
                operation: operation.to_string(),
                reason: format!(
                    "request returned {} code, but response body doesn't contain explanation: {}",
                    response.status.as_u16(),
                    response.body
                ),
            },
        }
    }

    fn protocol_error(&self, operation: &str, reason: String) -> Error {
        Error::Protocol {
            endpoint: self.transport.address().to_string(),
            operation: operation.to_string(),
            reason,
        }
    }

    async fn query_filesystems(
        &self,
        ctx: &RequestContext,
        operation: &str,
        filter: &str,
        value: &str,
    ) -> Result<Vec<Filesystem>> {
        let mut params = BTreeMap::new();
        params.insert(filter, value);
        params.insert("fields", FILESYSTEM_FIELDS);
        let uri = build_uri("/storage/filesystems", &params);

        let body = self.call(ctx, operation, Method::GET, &uri, None).await?;
        let data = data_list(&body).map_err(|e| self.protocol_error(operation, e))?;

        data.iter()
            .map(|entry| {
                decode_entry::<FilesystemRecord>(entry)
                    .map(Filesystem::from)
                    .map_err(|e| self.protocol_error(operation, e))
            })
            .collect()
    }
}

/// Statuses a proxy or an overloaded appliance answers with
fn is_gateway_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_auth_failure(response: &RestResponse) -> bool {
    response.status == StatusCode::UNAUTHORIZED
        || (response.status.is_client_error()
            && classify(response.status, &response.body)
                .map(|e| e.kind() == NefErrorKind::Auth)
                .unwrap_or(false))
}

fn require_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Validation("Filesystem path is empty".into()));
    }
    Ok(())
}

#[async_trait]
impl<T: Transport> StorageProvider for NsProvider<T> {
    async fn log_in(&self, ctx: &RequestContext) -> Result<()> {
        self.session.log_in(ctx, &self.transport).await
    }

    async fn get_pool_status(&self, ctx: &RequestContext) -> Result<Vec<Pool>> {
        const OPERATION: &str = "Get pools";
        let mut params = BTreeMap::new();
        params.insert("fields", POOL_FIELDS);
        let uri = build_uri("/storage/pools", &params);

        let body = self.call(ctx, OPERATION, Method::GET, &uri, None).await?;
        let data = data_list(&body).map_err(|e| self.protocol_error(OPERATION, e))?;

        data.iter()
            .map(|entry| {
                decode_entry::<PoolRecord>(entry)
                    .map(|p| Pool {
                        name: p.pool_name,
                        health: p.health,
                        status: p.status,
                    })
                    .map_err(|e| self.protocol_error(OPERATION, e))
            })
            .collect()
    }

    async fn get_filesystem(
        &self,
        ctx: &RequestContext,
        path: &str,
    ) -> Result<Option<Filesystem>> {
        require_path(path)?;
        const OPERATION: &str = "Get filesystem";
        let mut params = BTreeMap::new();
        params.insert("path", path);
        params.insert("fields", FILESYSTEM_FIELDS);
        let uri = build_uri("/storage/filesystems", &params);

        let body = self.call(ctx, OPERATION, Method::GET, &uri, None).await?;
        let data = data_list(&body).map_err(|e| self.protocol_error(OPERATION, e))?;

        match data.first() {
            Some(entry) => decode_entry::<FilesystemRecord>(entry)
                .map(|r| Some(r.into()))
                .map_err(|e| self.protocol_error(OPERATION, e)),
            None => Ok(None),
        }
    }

    async fn get_filesystems(
        &self,
        ctx: &RequestContext,
        parent: &str,
    ) -> Result<Vec<Filesystem>> {
        require_path(parent)?;
        let filesystems = self
            .query_filesystems(ctx, "Get filesystems", "parent", parent)
            .await?;
        Ok(filesystems
            .into_iter()
            .filter(|fs| fs.path != parent)
            .collect())
    }

    async fn create_filesystem(
        &self,
        ctx: &RequestContext,
        path: &str,
        params: FilesystemParams,
    ) -> Result<()> {
        require_path(path)?;
        if params.contains_key("path") {
            return Err(Error::Validation(
                "Filesystem parameters must not override 'path'".into(),
            ));
        }

        let mut body = params;
        body.insert("path".to_string(), Value::String(path.to_string()));

        info!("Creating filesystem {} on {}", path, self.transport.address());
        self.call(
            ctx,
            "Create filesystem",
            Method::POST,
            "/storage/filesystems",
            Some(Value::Object(body)),
        )
        .await?;
        Ok(())
    }

    async fn destroy_filesystem(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        require_path(path)?;
        let uri = format!("/storage/filesystems/{}", escape_path(path));

        info!("Destroying filesystem {} on {}", path, self.transport.address());
        self.call(ctx, "Destroy filesystem", Method::DELETE, &uri, None)
            .await?;
        Ok(())
    }

    async fn create_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        require_path(path)?;
        let request = NfsShareRequest {
            filesystem: path,
            anon: "root",
            security_contexts: vec![SecurityContext {
                security_modes: vec!["sys"],
            }],
        };

        info!("Creating NFS share for {}", path);
        self.call(
            ctx,
            "Create NFS share",
            Method::POST,
            "nas/nfs",
            Some(serde_json::to_value(&request)?),
        )
        .await?;
        Ok(())
    }

    async fn delete_nfs_share(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        require_path(path)?;
        let uri = format!("/nas/nfs/{}", escape_path(path));

        info!("Deleting NFS share for {}", path);
        self.call(ctx, "Delete NFS share", Method::DELETE, &uri, None)
            .await?;
        Ok(())
    }

    async fn set_filesystem_acl(
        &self,
        ctx: &RequestContext,
        path: &str,
        rule_set: AclRuleSet,
    ) -> Result<()> {
        require_path(path)?;
        let request = AclRequest {
            kind: "allow",
            principal: "everyone@",
            flags: vec!["file_inherit", "dir_inherit"],
            permissions: rule_set.permissions().to_vec(),
        };
        let uri = format!("/storage/filesystems/{}/acl", escape_path(path));

        debug!("Setting {} ACL on {}", rule_set, path);
        self.call(
            ctx,
            "Set filesystem ACL",
            Method::POST,
            &uri,
            Some(serde_json::to_value(&request)?),
        )
        .await?;
        Ok(())
    }

    async fn is_job_done(&self, ctx: &RequestContext, job_id: &str) -> Result<bool> {
        if job_id.is_empty() {
            return Err(Error::Validation("Job id is empty".into()));
        }
        let uri = format!("/jobStatus/{}", escape_path(job_id));

        let response = self
            .request(ctx, "Job status", Method::GET, &uri, None)
            .await?;
        match response.status {
            StatusCode::OK | StatusCode::CREATED => Ok(true),
            StatusCode::ACCEPTED => Ok(false),
            status if is_gateway_failure(status) => Err(self.status_error("Job status", response)),
            status => match classify(status, &response.body) {
                Some(source) => Err(Error::JobFailed {
                    job_id: job_id.to_string(),
                    source,
                }),
                None => Err(self.protocol_error(
                    "Job status",
                    format!(
                        "Job request returned {} code, but response body doesn't contain explanation: {}",
                        status.as_u16(),
                        response.body
                    ),
                )),
            },
        }
    }

    fn address(&self) -> &str {
        self.transport.address()
    }
}
