//! Storage Backend Adapters
//!
//! Provides the NexentaStor appliance adapter and the factory that builds
//! the provider graph from configuration.

pub mod nexentastor;

pub use nexentastor::*;

use crate::config::Config;
use crate::controlplane::cluster::ClusterProvider;
use crate::domain::ports::StorageProviderRef;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Factory for creating storage providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider for one appliance address
    pub fn create(address: &str, config: &Config) -> Result<Arc<NsProvider>> {
        let provider = NsProvider::new(ProviderArgs {
            address: address.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            transport: config.rest_client_config(),
        })?;
        Ok(Arc::new(provider))
    }

    /// Create the failover cluster over every configured address
    pub fn from_config(config: &Config) -> Result<Arc<ClusterProvider>> {
        config.validate()?;
        let addresses = config.addresses()?;

        let providers = addresses
            .iter()
            .map(|address| Self::create(address, config).map(|p| p as StorageProviderRef))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "NexentaStor cluster with {} endpoint(s): {}",
            providers.len(),
            addresses.join(", ")
        );
        Ok(Arc::new(ClusterProvider::new(providers, config.health_policy())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StorageProvider;
    use crate::error::Error;
    use assert_matches::assert_matches;

    fn config(address: &str) -> Config {
        Config {
            address: address.into(),
            username: "admin".into(),
            password: "Nexenta@1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_single_provider() {
        let provider = ProviderFactory::create("https://10.3.199.252:8443", &config("")).unwrap();
        assert_eq!(provider.address(), "https://10.3.199.252:8443");
        assert!(!provider.session().is_logged_in());
    }

    #[test]
    fn test_cluster_from_config() {
        let cluster = ProviderFactory::from_config(&config(
            "https://10.3.199.252:8443,https://10.3.199.253:8443",
        ))
        .unwrap();

        let statuses = cluster.endpoint_statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[1].address, "https://10.3.199.253:8443");
        assert_eq!(cluster.active_endpoint(), "https://10.3.199.252:8443");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut invalid = config("https://10.3.199.252:8443");
        invalid.password.clear();
        assert_matches!(
            ProviderFactory::from_config(&invalid),
            Err(Error::Configuration(_))
        );
    }
}
