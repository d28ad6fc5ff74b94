//! # Configuration
//!
//! Reads and parses the service configuration file. Relative paths are
//! resolved against the directory containing the config file, and the CA
//! key path is checked for existence up front so misconfiguration fails
//! before the first request.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;

/// The top-level service configuration.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub authorize: AuthorizeConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: ":8080".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub oidc: OidcSettings,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct OidcSettings {
    pub issuer_url: String,
    pub client_id: String,
    pub skip_client_id_check: bool,
    pub claims: ClaimNames,
    pub http_timeout_secs: u64,
}

impl Default for OidcSettings {
    fn default() -> Self {
        OidcSettings {
            issuer_url: String::new(),
            client_id: String::new(),
            skip_client_id_check: false,
            claims: ClaimNames::default(),
            http_timeout_secs: 10,
        }
    }
}

/// Claim-name overrides; empty fields keep the IdP-agnostic defaults.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClaimNames {
    pub username: String,
    pub email: String,
    pub roles: String,
    pub groups: String,
}

impl Default for ClaimNames {
    fn default() -> Self {
        ClaimNames {
            username: "preferred_username".to_string(),
            email: "email".to_string(),
            roles: "roles".to_string(),
            groups: "groups".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthorizeConfig {
    pub allow_roles: Vec<String>,
    pub allow_groups: Vec<String>,
    pub principal_templates: Vec<String>,
    pub default_ttl_secs: u64,
    pub max_ttl_secs: u64,
    pub source_cidrs: Vec<String>,
}

impl Default for AuthorizeConfig {
    fn default() -> Self {
        AuthorizeConfig {
            allow_roles: Vec::new(),
            allow_groups: Vec::new(),
            principal_templates: Vec::new(),
            default_ttl_secs: 3600,
            max_ttl_secs: 8 * 3600,
            source_cidrs: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SignerConfig {
    /// Path to the CA private key (PEM PKCS#8 or OpenSSH, Ed25519).
    pub ca_key: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the serial counter file. Empty selects the non-durable
    /// in-memory store.
    pub serial_file: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            sink: "stdout".to_string(),
        }
    }
}

/// Reads and parses the configuration file.
///
/// # Arguments
///
/// * `file_path` - The path to the configuration file.
///
/// # Returns
///
/// A `Result` containing the parsed `Config` or an error.
pub fn read_config(file_path: &str) -> Result<Config> {
    let config_path = PathBuf::from(file_path);
    let config_root = match config_path.exists() {
        false => {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("config file {} not found", file_path),
            )
            .into());
        }
        true => config_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
    };

    let mut config_file = File::open(&config_path)?;
    let mut raw = String::new();
    config_file.read_to_string(&mut raw)?;

    let mut config: Config = toml::from_str(&raw)?;
    config.signer.ca_key = resolve_path(&config_root, &config.signer.ca_key);
    if !config.storage.serial_file.as_os_str().is_empty() {
        config.storage.serial_file = resolve_path(&config_root, &config.storage.serial_file);
    }
    check_paths(&config)?;

    Ok(config)
}

fn resolve_path(config_root: &Path, path: &Path) -> PathBuf {
    if path.has_root() {
        path.to_path_buf()
    } else {
        config_root.join(path)
    }
}

fn check_paths(config: &Config) -> Result<()> {
    if config.signer.ca_key.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "signer.ca_key is required",
        )
        .into());
    }
    if !config.signer.ca_key.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("CA key file {:?} not found", config.signer.ca_key),
        )
        .into());
    }
    Ok(())
}
