use crate::utils::{
    trim_end_slashes, DEFAULT_ASSETS_DIR, DEFAULT_MANIFEST_FILE, DEFAULT_TIMESTAMP_FILE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "provision.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration not found at {0}")]
    NotFound(String),

    #[error("Missing configuration value: {0}")]
    MissingValue(&'static str),
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from(DEFAULT_MANIFEST_FILE)
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ASSETS_DIR)
}

fn default_timestamp_file() -> PathBuf {
    PathBuf::from(DEFAULT_TIMESTAMP_FILE)
}

/// Ten minutes, long enough for sub-site creation
fn default_request_timeout_secs() -> u64 {
    600
}

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionConfig {
    /// Web application URL, e.g. `https://intranet.example.com`
    pub url: String,
    /// Site collection path below `url`, e.g. `sites/portal`
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adfs_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adfs_urn: Option<String>,
    /// Bearer token used on the `online` authentication path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Term group receiving imported term sets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_group_name: Option<String>,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_timestamp_file")]
    pub timestamp_file: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ProvisionConfig {
    /// Absolute URL of the site collection
    pub fn site_url(&self) -> String {
        let site = trim_end_slashes(&self.site);
        if site.is_empty() {
            trim_end_slashes(&self.url).to_string()
        } else {
            format!("{}/{}", trim_end_slashes(&self.url), site)
        }
    }

    /// User name qualified with the domain when one is configured
    pub fn qualified_username(&self) -> String {
        if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        }
    }
}

/// Read the configuration file
pub async fn read_config(path: &Path) -> Result<ProvisionConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = fs::read_to_string(path).await?;
    let config: ProvisionConfig = serde_json::from_str(&content)?;

    if config.url.trim().is_empty() {
        return Err(ConfigError::MissingValue("url"));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_config_applies_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"{
                "url": "https://intranet.example.com/",
                "site": "sites/portal/",
                "username": "svc",
                "domain": "CORP"
            }"#,
        )
        .await
        .unwrap();

        let config = read_config(&path).await.unwrap();

        assert_eq!(config.site_url(), "https://intranet.example.com/sites/portal");
        assert_eq!(config.qualified_username(), "CORP\\svc");
        assert_eq!(config.manifest_path, PathBuf::from("settings.xml"));
        assert_eq!(config.assets_dir, PathBuf::from("Branding"));
        assert_eq!(config.timestamp_file, PathBuf::from("lastrun.log"));
        assert_eq!(config.request_timeout_secs, 600);
        assert!(config.term_group_name.is_none());
    }

    #[tokio::test]
    async fn test_read_config_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = read_config(&temp.path().join("nope.json")).await;
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_config_requires_url() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, r#"{ "url": "  " }"#).await.unwrap();

        let result = read_config(&path).await;
        assert!(matches!(result, Err(ConfigError::MissingValue("url"))));
    }

    #[test]
    fn test_site_url_without_site() {
        let config: ProvisionConfig =
            serde_json::from_str(r#"{ "url": "https://x.example.com/" }"#).unwrap();
        assert_eq!(config.site_url(), "https://x.example.com");
    }
}
