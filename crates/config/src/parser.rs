use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PoolConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse a YAML document after environment substitution
pub fn parse_config(content: &str) -> Result<PoolConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: PoolConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(service = %config.service.name, "Configuration loaded successfully");
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> PoolConfig {
    PoolConfig::default()
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &PoolConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_default() {
        let path = std::env::temp_dir().join(format!(
            "poolx-config-test-{}.yaml",
            std::process::id()
        ));
        save_config(&generate_default_config(), &path).unwrap();

        let loaded = load_config(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.service.name, "ridepool");
        assert_eq!(loaded.matching.approval_timeout_secs, Some(90));
        assert!(validate_config(&loaded).is_valid());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/nonexistent/poolx.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_substitutes_env() {
        std::env::set_var("RIDEPOOL_TEST_SERVICE_NAME", "pool-east");
        let cfg = parse_config("service:\n  name: ${RIDEPOOL_TEST_SERVICE_NAME}\n").unwrap();
        assert_eq!(cfg.service.name, "pool-east");
    }
}
