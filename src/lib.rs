//! NexentaStor CSI Driver - Storage Provider Core
//!
//! Turns volume lifecycle requests into operations against NexentaStor
//! appliances over their management REST API, failing over between
//! redundant appliance endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ClusterProvider                       │
//! │        ordered failover, endpoint health policy          │
//! ├──────────────────────────────────────────────────────────┤
//! │   NsProvider (A)      │   NsProvider (B)    │   ...      │
//! │   Session + Transport │   Session + Transport            │
//! └───────────┬───────────┴───────────┬──────────────────────┘
//!             │                       │
//!        appliance A             appliance B
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: NexentaStor adapter, failover cluster and job poller
//! - [`domain`]: Storage provider port and domain types
//! - [`config`]: Configuration file and command line overrides
//! - [`context`]: Caller deadline and cancellation
//! - [`error`]: Error types and handling

pub mod config;
pub mod context;
pub mod controlplane;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use config::{Config, Overrides};

pub use context::RequestContext;

pub use controlplane::{
    wait_for_job, ClusterProvider, EndpointStatus, HealthPolicy, NsProvider, PollPolicy,
    ProviderArgs, ProviderFactory,
};

pub use domain::ports::{
    AclRuleSet, Filesystem, FilesystemParams, Pool, StorageProvider, StorageProviderRef,
};

pub use error::{Error, ErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
