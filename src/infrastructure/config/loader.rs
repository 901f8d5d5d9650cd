//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::models::config::ServiceConfig;

/// Loads and validates service configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .packmule/config.yaml (service config)
    /// 3. .packmule/local.yaml (local overrides, optional)
    /// 4. Environment variables (`PACKMULE_` prefix, highest priority)
    ///
    /// Configuration is always project-local so one appliance can run
    /// several services with different content sets.
    pub fn load() -> Result<ServiceConfig> {
        let config: ServiceConfig = Figment::new()
            .merge(Serialized::defaults(ServiceConfig::default()))
            .merge(Yaml::file(".packmule/config.yaml"))
            .merge(Yaml::file(".packmule/local.yaml"))
            .merge(Env::prefixed("PACKMULE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<ServiceConfig> {
        let config: ServiceConfig = Figment::new()
            .merge(Serialized::defaults(ServiceConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file_merges_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "service_name: media-sync\nmax_concurrent_operations: 3\n"
        )
        .expect("write");

        let config = ConfigLoader::load_from_file(file.path()).expect("load");
        assert_eq!(config.service_name, "media-sync");
        assert_eq!(config.max_concurrent_operations, 3);
        assert_eq!(config.notification_ring_capacity, 1000);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "max_concurrent_operations: 99\n").expect("write");
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_defaults() {
        temp_env::with_var("PACKMULE_MAX_CONCURRENT_OPERATIONS", Some("2"), || {
            let config = ConfigLoader::load().expect("load");
            assert_eq!(config.max_concurrent_operations, 2);
        });
    }
}
