//! Storage Control Plane
//!
//! Appliance adapters, the failover cluster built on top of them and the
//! job poller used by callers of asynchronous appliance operations.

pub mod backends;
pub mod cluster;
pub mod jobs;

pub use backends::{NsProvider, ProviderArgs, ProviderFactory};
pub use cluster::{ClusterProvider, EndpointStatus, HealthPolicy};
pub use jobs::{wait_for_job, PollPolicy};
