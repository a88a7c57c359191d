//! NexentaStor Backend Adapter
//!
//! Talks to one appliance over its management REST API:
//! - `rest`: HTTP transport
//! - `envelope`: error envelope and response schema decoding
//! - `session`: login and token refresh
//! - `provider`: storage operations

pub mod envelope;
pub mod provider;
pub mod rest;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use envelope::{NefError, NefErrorKind};
pub use provider::{NsProvider, ProviderArgs};
pub use rest::{RestClient, RestClientConfig, RestResponse, Transport};
pub use session::{Credentials, Session};
