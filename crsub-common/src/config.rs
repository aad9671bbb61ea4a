//! Configuration loading and resolution
//!
//! Resolution priority, highest first:
//! 1. Command-line overrides
//! 2. Environment variables (`GRIST_SERVER`, `GRIST_DOC_ID`, `GRIST_API_KEY`,
//!    `GRIST_TABLE_CRCA`, `GRIST_TABLE_CRFM`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: the relay starts on defaults and logs
//! a warning. A missing credential is not an error either; submissions then
//! fail with [`Error::MissingCredential`] before any network call.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::dispatcher::RetryPolicy;
use crate::schema::RecordKind;
use crate::upstream::is_valid_table_name;
use crate::{Error, Result};

pub const DEFAULT_SERVER: &str = "https://grist.numerique.gouv.fr";
pub const DEFAULT_DOC_ID: &str = "287D12LdHqN4hYBpsm52fo";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_SERVER: &str = "GRIST_SERVER";
pub const ENV_DOC_ID: &str = "GRIST_DOC_ID";
pub const ENV_API_KEY: &str = "GRIST_API_KEY";
pub const ENV_TABLE_CRCA: &str = "GRIST_TABLE_CRCA";
pub const ENV_TABLE_CRFM: &str = "GRIST_TABLE_CRFM";

/// Bootstrap configuration as read from the TOML file
///
/// Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub grist: GristSection,
    pub retry: RetrySection,
    pub http: HttpSection,
    pub drafts: DraftsSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GristSection {
    pub server: Option<String>,
    pub doc_id: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub tables: TablesSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TablesSection {
    pub crca: Option<String>,
    pub crfm: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub backoff_step_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DraftsSection {
    /// SQLite file holding the draft slots
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl TomlConfig {
    /// Read and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load the explicit file, or the platform default file when present
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file falls back to built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        match default_config_path() {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }
}

/// First existing config file among the platform locations
///
/// `~/.config/crsub/config.toml`, then `/etc/crsub/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("crsub").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/crsub/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default location of the drafts database
pub fn default_drafts_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("crsub").join("drafts.db"))
        .unwrap_or_else(|| PathBuf::from("./crsub_data/drafts.db"))
}

/// Grist table name of each record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub crca: String,
    pub crfm: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            crca: RecordKind::Crca.code().to_string(),
            crfm: RecordKind::Crfm.code().to_string(),
        }
    }
}

impl TableNames {
    pub fn table_for(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Crca => &self.crca,
            RecordKind::Crfm => &self.crfm,
        }
    }

    /// Record kind behind a requested table
    ///
    /// Accepts the configured table names exactly and the kind codes in any
    /// case.
    pub fn kind_for_table(&self, table: &str) -> Result<RecordKind> {
        let table = table.trim();
        RecordKind::ALL
            .into_iter()
            .find(|kind| self.table_for(*kind) == table)
            .or_else(|| table.parse::<RecordKind>().ok())
            .ok_or_else(|| Error::UnsupportedTable(table.to_string()))
    }
}

/// Everything needed to reach the Grist document
#[derive(Clone)]
pub struct GristConfig {
    pub server: String,
    pub doc_id: String,
    /// Bearer credential; `None` disables submissions
    pub api_key: Option<String>,
    pub tables: TableNames,
    /// Hard timeout of one HTTP attempt
    pub request_timeout: Duration,
}

impl GristConfig {
    /// Configured, non-empty credential
    pub fn credential(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(Error::MissingCredential)
    }
}

impl Default for GristConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            doc_id: DEFAULT_DOC_ID.to_string(),
            api_key: None,
            tables: TableNames::default(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

// Manual impl keeps the credential out of logs
impl fmt::Debug for GristConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GristConfig")
            .field("server", &self.server)
            .field("doc_id", &self.doc_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("tables", &self.tables)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub drafts_path: Option<PathBuf>,
}

/// Fully resolved relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub grist: GristConfig,
    pub retry: RetryPolicy,
    pub host: String,
    pub port: u16,
    pub drafts_path: PathBuf,
    pub log_level: String,
}

impl RelayConfig {
    /// Resolve against the process environment
    pub fn resolve(toml: &TomlConfig, overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve_with(toml, overrides, |name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment lookup
    pub fn resolve_with<F>(toml: &TomlConfig, overrides: &ConfigOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let server = env(ENV_SERVER)
            .or_else(|| toml.grist.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let doc_id = env(ENV_DOC_ID)
            .or_else(|| toml.grist.doc_id.clone())
            .unwrap_or_else(|| DEFAULT_DOC_ID.to_string());

        let api_key = match (env(ENV_API_KEY), toml.grist.api_key.clone()) {
            (Some(key), Some(_)) => {
                warn!("Grist API key found in environment and TOML config, using environment");
                Some(key)
            }
            (Some(key), None) => Some(key),
            (None, key) => key.filter(|k| !k.trim().is_empty()),
        };

        let tables = TableNames {
            crca: env(ENV_TABLE_CRCA)
                .or_else(|| toml.grist.tables.crca.clone())
                .unwrap_or_else(|| RecordKind::Crca.code().to_string()),
            crfm: env(ENV_TABLE_CRFM)
                .or_else(|| toml.grist.tables.crfm.clone())
                .unwrap_or_else(|| RecordKind::Crfm.code().to_string()),
        };

        let request_timeout = Duration::from_millis(
            toml.grist
                .request_timeout_ms
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        );

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: toml.retry.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_step: toml
                .retry
                .backoff_step_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_step),
        };

        let config = Self {
            grist: GristConfig {
                server: server.trim_end_matches('/').to_string(),
                doc_id,
                api_key,
                tables,
                request_timeout,
            },
            retry,
            host: overrides
                .host
                .clone()
                .or_else(|| toml.http.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: overrides.port.or(toml.http.port).unwrap_or(DEFAULT_PORT),
            drafts_path: overrides
                .drafts_path
                .clone()
                .or_else(|| toml.drafts.path.clone())
                .unwrap_or_else(default_drafts_path),
            log_level: toml.logging.level.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let server = &self.grist.server;
        if !(server.starts_with("https://") || server.starts_with("http://")) {
            return Err(Error::Config(format!(
                "Grist server must be an http(s) URL, got '{}'",
                server
            )));
        }
        if !is_valid_table_name(&self.grist.doc_id) {
            return Err(Error::Config(format!(
                "Invalid Grist document id '{}'",
                self.grist.doc_id
            )));
        }
        for kind in RecordKind::ALL {
            let table = self.grist.tables.table_for(kind);
            if !is_valid_table_name(table) {
                return Err(Error::Config(format!(
                    "Invalid table name '{}' for {}",
                    table, kind
                )));
            }
        }
        if self.grist.tables.crca == self.grist.tables.crfm {
            return Err(Error::Config(
                "CRCA and CRFM must target different tables".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Log the resolved configuration (credential presence only)
    pub fn log_summary(&self) {
        info!(
            server = %self.grist.server,
            doc_id = %self.grist.doc_id,
            crca_table = %self.grist.tables.crca,
            crfm_table = %self.grist.tables.crfm,
            timeout_ms = self.grist.request_timeout.as_millis() as u64,
            max_attempts = self.retry.max_attempts,
            "Grist target configured"
        );
        if self.grist.api_key.is_none() {
            warn!("GRIST_API_KEY not configured - submissions will be kept as drafts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_any_source() {
        let config =
            RelayConfig::resolve_with(&TomlConfig::default(), &ConfigOverrides::default(), no_env)
                .unwrap();

        assert_eq!(config.grist.server, DEFAULT_SERVER);
        assert_eq!(config.grist.doc_id, DEFAULT_DOC_ID);
        assert!(config.grist.api_key.is_none());
        assert_eq!(config.grist.tables, TableNames::default());
        assert_eq!(config.grist.request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_env_beats_toml_and_cli_beats_both() {
        let toml = TomlConfig::parse(
            r#"
            [grist]
            server = "https://toml.example.org"
            doc_id = "tomldoc"

            [grist.tables]
            crfm = "CRFM_Toml"

            [http]
            port = 6000
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_SERVER, "https://env.example.org/"),
            (ENV_TABLE_CRFM, "CRFM_Env"),
        ]
        .into_iter()
        .collect();
        let overrides = ConfigOverrides {
            port: Some(7000),
            ..Default::default()
        };

        let config = RelayConfig::resolve_with(&toml, &overrides, |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.grist.server, "https://env.example.org");
        assert_eq!(config.grist.doc_id, "tomldoc");
        assert_eq!(config.grist.tables.crfm, "CRFM_Env");
        assert_eq!(config.grist.tables.crca, "CRCA");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let config = RelayConfig::resolve_with(
            &TomlConfig::default(),
            &ConfigOverrides::default(),
            |name| (name == ENV_API_KEY).then(|| "  ".to_string()),
        )
        .unwrap();

        assert!(config.grist.api_key.is_none());
        assert!(matches!(config.grist.credential(), Err(Error::MissingCredential)));
    }

    #[test]
    fn test_invalid_server_rejected() {
        let toml = TomlConfig::parse("[grist]\nserver = \"ftp://grist\"\n").unwrap();
        let result = RelayConfig::resolve_with(&toml, &ConfigOverrides::default(), no_env);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_same_table_for_both_kinds_rejected() {
        let toml = TomlConfig::parse("[grist.tables]\ncrca = \"CRFM\"\n").unwrap();
        let result = RelayConfig::resolve_with(&toml, &ConfigOverrides::default(), no_env);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let toml = TomlConfig::parse("[retry]\nmax_attempts = 0\n").unwrap();
        let result = RelayConfig::resolve_with(&toml, &ConfigOverrides::default(), no_env);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_kind_for_table() {
        let tables = TableNames {
            crca: "Interventions".to_string(),
            crfm: "CRFM".to_string(),
        };

        assert_eq!(tables.kind_for_table("Interventions").unwrap(), RecordKind::Crca);
        assert_eq!(tables.kind_for_table("crca").unwrap(), RecordKind::Crca);
        assert_eq!(tables.kind_for_table("CRFM").unwrap(), RecordKind::Crfm);
        assert!(matches!(
            tables.kind_for_table("Escadron"),
            Err(Error::UnsupportedTable(t)) if t == "Escadron"
        ));
    }

    #[test]
    fn test_debug_redacts_credential() {
        let config = GristConfig {
            api_key: Some("secret-token".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
