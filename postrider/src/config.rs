//! Configuration loading for the postrider binary.

use std::path::{Path, PathBuf};

use anyhow::Context;
use postrider_common::Credential;
use postrider_delivery::EngineConfig;
use serde::{Deserialize, Serialize};

/// Everything `postrider.toml` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine tunables. An absent `[engine]` table means all defaults.
    #[serde(default)]
    pub engine: EngineConfig,

    /// The credential pool, one `[[credential]]` table per account.
    #[serde(default, rename = "credential")]
    pub credentials: Vec<Credential>,
}

impl Config {
    /// Parses the configuration at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        toml::from_str(&raw)
            .with_context(|| format!("{} is not a valid configuration file", path.display()))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `POSTRIDER_CONFIG` environment variable
/// 2. ./postrider.toml (current working directory)
/// 3. /etc/postrider/postrider.toml (system-wide config)
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("POSTRIDER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "POSTRIDER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./postrider.toml"),
        PathBuf::from("/etc/postrider/postrider.toml"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - POSTRIDER_CONFIG environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
mod tests {
    use postrider_delivery::RotationStrategy;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_load_parses_engine_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postrider.toml");
        std::fs::write(
            &path,
            r#"
            [engine]
            retry_limit = 2
            strategy = "round_robin"

            [[credential]]
            host = "smtp.example.com"
            username = "mailer"
            password = "pw"
            from_address = "mailer@example.com"

            [[credential]]
            host = "smtp.backup.example"
            port = 2525
            username = "fallback"
            password = "pw2"
            from_address = "mailer@example.com"
            encryption = "none"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.engine.retry_limit, 2);
        assert_eq!(config.engine.strategy, RotationStrategy::RoundRobin);
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].port, 587);
        assert_eq!(config.credentials[1].port, 2525);
    }

    #[test]
    fn test_empty_file_is_a_valid_pool_of_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postrider.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.engine.retry_limit, 5);
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn test_load_reports_the_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let error = Config::load(&path).unwrap_err();

        assert!(error.to_string().contains("absent.toml"));
    }
}
