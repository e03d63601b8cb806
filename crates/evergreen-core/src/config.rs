//! Configuration management for evergreen-mcp.
//!
//! Handles loading and saving configuration from TOML files.
//! Config files are stored in platform-specific locations:
//!
//! - **Linux**: `~/.config/evergreen-mcp/config.toml`
//! - **macOS**: `~/Library/Application Support/evergreen-mcp/config.toml`
//! - **Windows**: `%APPDATA%\evergreen-mcp\config.toml`
//!
//! # Example
//!
//! ```toml
//! [oauth]
//! issuer = "https://dex.example.com"
//! client_id = "evergreen-mcp"
//! token_file_path = "~/.kanopy/token-oidclogin.json"
//!
//! [projects_for_directory]
//! "/home/me/src/mongo" = "mongodb-mongo-master"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config directory name.
const CONFIG_DIR_NAME: &str = "evergreen-mcp";

/// Environment variable overriding `oauth.token_file_path`.
///
/// Useful in containers where the config file carries host paths.
pub const TOKEN_FILE_ENV: &str = "EVERGREEN_TOKEN_FILE";

/// GraphQL endpoint used with API key authentication.
pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "https://evergreen.mongodb.com/graphql/query";

/// GraphQL endpoint used with OIDC bearer tokens.
pub const DEFAULT_OIDC_GRAPHQL_ENDPOINT: &str =
    "https://evergreen.corp.mongodb.com/graphql/query";

// =============================================================================
// Configuration structures
// =============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OAuth / OIDC device flow configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,

    /// Evergreen API endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    /// Workspace directory → project identifier
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projects_for_directory: BTreeMap<String, String>,
}

/// `[oauth]` section as written in the file. Fields are validated by
/// [`Config::oauth_settings`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Authorization server base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// OAuth client identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Where to cache tokens between runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file_path: Option<String>,
}

/// `[api]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// GraphQL endpoint for bearer token auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql_endpoint: Option<String>,
    /// GraphQL endpoint for API key auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_graphql_endpoint: Option<String>,
}

/// Validated OAuth settings consumed by the authentication manager.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthSettings {
    pub issuer: String,
    pub client_id: String,
    /// `None` keeps the session in memory only.
    pub token_file: Option<PathBuf>,
}

impl OAuthSettings {
    pub fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            token_file: None,
        }
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }
}

// =============================================================================
// Config implementation
// =============================================================================

impl Config {
    /// Get the configuration directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(CONFIG_DIR_NAME))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default location.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Returns a default (empty) config if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        debug!(path = ?path, "Loading config");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(path = ?path, "Config loaded successfully");
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        debug!(path = ?path, "Saving config");

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        info!(path = ?path, "Config saved successfully");
        Ok(())
    }

    /// Validate the `[oauth]` section, honouring [`TOKEN_FILE_ENV`].
    pub fn oauth_settings(&self) -> Result<OAuthSettings> {
        self.oauth_settings_with(std::env::var(TOKEN_FILE_ENV).ok())
    }

    /// Validate the `[oauth]` section with an explicit token file override.
    ///
    /// All missing required fields are reported at once.
    pub fn oauth_settings_with(&self, token_file_override: Option<String>) -> Result<OAuthSettings> {
        let Some(oauth) = &self.oauth else {
            return Err(Error::Config(
                "Missing [oauth] section in config file. Required fields: issuer, client_id"
                    .to_string(),
            ));
        };

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        let mut missing = Vec::new();
        if !present(&oauth.issuer) {
            missing.push("issuer");
        }
        if !present(&oauth.client_id) {
            missing.push("client_id");
        }
        let (Some(issuer), Some(client_id), true) =
            (&oauth.issuer, &oauth.client_id, missing.is_empty())
        else {
            return Err(Error::Config(format!(
                "Missing required oauth fields: {}",
                missing.join(", ")
            )));
        };

        let token_file = token_file_override
            .filter(|s| !s.is_empty())
            .or_else(|| oauth.token_file_path.clone())
            .map(|p| expand_home(Path::new(&p)));

        let mut settings = OAuthSettings::new(issuer.trim(), client_id.trim());
        settings.token_file = token_file;
        Ok(settings)
    }

    /// GraphQL endpoint for the chosen authentication method.
    pub fn graphql_endpoint(&self, bearer: bool) -> String {
        let api = self.api.as_ref();
        let configured = if bearer {
            api.and_then(|a| a.graphql_endpoint.clone())
        } else {
            api.and_then(|a| a.api_key_graphql_endpoint.clone())
        };
        configured.unwrap_or_else(|| {
            if bearer {
                DEFAULT_OIDC_GRAPHQL_ENDPOINT.to_string()
            } else {
                DEFAULT_GRAPHQL_ENDPOINT.to_string()
            }
        })
    }

    /// Set a configuration value by key path.
    ///
    /// Key format: `section.field` (e.g., `oauth.issuer`, `api.graphql_endpoint`).
    /// Directory mappings use `projects_for_directory.<path>`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let (section, field) = split_key(key)?;

        match section {
            "oauth" => {
                let config = self.oauth.get_or_insert_with(OAuthConfig::default);
                match field {
                    "issuer" => config.issuer = Some(value.to_string()),
                    "client_id" => config.client_id = Some(value.to_string()),
                    "token_file_path" | "token_file" => {
                        config.token_file_path = Some(value.to_string())
                    }
                    _ => {
                        return Err(Error::Config(format!(
                            "Unknown oauth config field: {}",
                            field
                        )))
                    }
                }
            }
            "api" => {
                let config = self.api.get_or_insert_with(ApiConfig::default);
                match field {
                    "graphql_endpoint" => config.graphql_endpoint = Some(value.to_string()),
                    "api_key_graphql_endpoint" => {
                        config.api_key_graphql_endpoint = Some(value.to_string())
                    }
                    _ => {
                        return Err(Error::Config(format!(
                            "Unknown api config field: {}",
                            field
                        )))
                    }
                }
            }
            "projects_for_directory" => {
                self.projects_for_directory
                    .insert(field.to_string(), value.to_string());
            }
            _ => {
                return Err(Error::Config(format!("Unknown config section: {}", section)));
            }
        }

        Ok(())
    }

    /// Get a configuration value by key path.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let (section, field) = split_key(key)?;

        match section {
            "oauth" => {
                let Some(config) = &self.oauth else {
                    return Ok(None);
                };
                match field {
                    "issuer" => Ok(config.issuer.clone()),
                    "client_id" => Ok(config.client_id.clone()),
                    "token_file_path" | "token_file" => Ok(config.token_file_path.clone()),
                    _ => Err(Error::Config(format!(
                        "Unknown oauth config field: {}",
                        field
                    ))),
                }
            }
            "api" => {
                let Some(config) = &self.api else {
                    return Ok(None);
                };
                match field {
                    "graphql_endpoint" => Ok(config.graphql_endpoint.clone()),
                    "api_key_graphql_endpoint" => Ok(config.api_key_graphql_endpoint.clone()),
                    _ => Err(Error::Config(format!(
                        "Unknown api config field: {}",
                        field
                    ))),
                }
            }
            "projects_for_directory" => Ok(self.projects_for_directory.get(field).cloned()),
            _ => Err(Error::Config(format!("Unknown config section: {}", section))),
        }
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('.') {
        Some((section, field)) if !section.is_empty() && !field.is_empty() => {
            Ok((section, field))
        }
        _ => Err(Error::Config(format!(
            "Invalid config key '{}'. Expected format: section.field",
            key
        ))),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn oauth_config(issuer: Option<&str>, client_id: Option<&str>) -> Config {
        Config {
            oauth: Some(OAuthConfig {
                issuer: issuer.map(String::from),
                client_id: client_id.map(String::from),
                token_file_path: Some("/tmp/evg/token.json".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.oauth.is_none());
        assert!(config.api.is_none());
        assert!(config.projects_for_directory.is_empty());
    }

    #[test]
    fn test_oauth_settings_valid() {
        let config = oauth_config(Some("https://idp.test/"), Some("abc"));
        let settings = config.oauth_settings_with(None).unwrap();

        assert_eq!(settings.issuer, "https://idp.test");
        assert_eq!(settings.client_id, "abc");
        assert_eq!(
            settings.token_file,
            Some(PathBuf::from("/tmp/evg/token.json"))
        );
    }

    #[test]
    fn test_oauth_settings_env_override_wins() {
        let config = oauth_config(Some("https://idp.test"), Some("abc"));
        let settings = config
            .oauth_settings_with(Some("/container/token.json".to_string()))
            .unwrap();
        assert_eq!(
            settings.token_file,
            Some(PathBuf::from("/container/token.json"))
        );

        // Empty override falls back to the file value
        let settings = config.oauth_settings_with(Some(String::new())).unwrap();
        assert_eq!(
            settings.token_file,
            Some(PathBuf::from("/tmp/evg/token.json"))
        );
    }

    #[test]
    fn test_oauth_settings_missing_section() {
        let err = Config::default().oauth_settings_with(None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("[oauth]"));
        assert!(msg.contains("issuer"));
        assert!(msg.contains("client_id"));
    }

    #[test]
    fn test_oauth_settings_lists_all_missing_fields() {
        let err = oauth_config(None, Some(" "))
            .oauth_settings_with(None)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("issuer"));
        assert!(msg.contains("client_id"));

        let err = oauth_config(Some("https://idp.test"), None)
            .oauth_settings_with(None)
            .unwrap_err();
        assert!(err.to_string().contains("client_id"));
        assert!(!err.to_string().contains("issuer"));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();

        config.set("oauth.issuer", "https://idp.test").unwrap();
        config.set("oauth.client_id", "abc").unwrap();
        config.set("api.graphql_endpoint", "https://evg.test/graphql/query").unwrap();
        config
            .set("projects_for_directory./home/me/mongo", "mongodb-mongo-master")
            .unwrap();

        assert_eq!(
            config.get("oauth.issuer").unwrap(),
            Some("https://idp.test".to_string())
        );
        assert_eq!(config.get("oauth.client_id").unwrap(), Some("abc".to_string()));
        assert_eq!(
            config.get("projects_for_directory./home/me/mongo").unwrap(),
            Some("mongodb-mongo-master".to_string())
        );
        assert_eq!(config.graphql_endpoint(true), "https://evg.test/graphql/query");
        assert_eq!(config.graphql_endpoint(false), DEFAULT_GRAPHQL_ENDPOINT);
    }

    #[test]
    fn test_invalid_key() {
        let mut config = Config::default();

        assert!(config.set("invalid", "value").is_err());
        assert!(config.set("oauth.", "value").is_err());
        assert!(config.set("unknown.field", "value").is_err());
        assert!(config.set("oauth.unknown", "value").is_err());

        // Section not configured yet
        assert_eq!(config.get("oauth.issuer").unwrap(), None);

        config.set("oauth.issuer", "x").unwrap();
        assert!(config.get("oauth.unknown_field").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = oauth_config(Some("https://idp.test"), Some("abc"));
        config
            .projects_for_directory
            .insert("/work/mms".to_string(), "mms".to_string());

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        config.save_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[oauth]"));
        assert!(contents.contains("issuer = \"https://idp.test\""));
        assert!(contents.contains("[projects_for_directory]"));

        let loaded = Config::load_from(&path).unwrap();
        let oauth = loaded.oauth.unwrap();
        assert_eq!(oauth.client_id.as_deref(), Some("abc"));
        assert_eq!(
            loaded.projects_for_directory.get("/work/mms").map(String::as_str),
            Some("mms")
        );
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/nonexistent/path/config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(config.oauth.is_none());
    }

    #[test]
    fn test_load_malformed() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[oauth\nissuer = ").unwrap();

        let err = Config::load_from(temp_file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home(Path::new("/abs/token.json")),
            PathBuf::from("/abs/token.json")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/.kanopy/token.json")),
                home.join(".kanopy/token.json")
            );
        }
    }
}
