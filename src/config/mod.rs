use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Externally visible base URL (e.g. behind a reverse proxy)
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token algorithm: "HS256" (shared secret) or "RS256" (public key)
    #[serde(default = "default_auth_algorithm")]
    pub algorithm: String,

    /// Shared secret for HS256. Supports `${VAR}` expansion.
    #[serde(default)]
    pub secret: String,

    /// PEM-encoded RSA public key for RS256
    #[serde(default)]
    pub public_key_file: Option<String>,

    /// Required `iss` claim, if set
    #[serde(default)]
    pub issuer: Option<String>,

    /// Required `aud` claim, if set
    #[serde(default)]
    pub audience: Option<String>,

    /// JSON file holding user records (array of `{uid, disabled, disabledReason, role}`)
    #[serde(default)]
    pub users_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object store root. Default: data_dir/objects
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Lifetime of issued signed URLs
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,

    /// URL signing secret. Supports `${VAR}` expansion.
    /// When unset the key file in the data directory is used.
    #[serde(default)]
    pub signing_key: Option<String>,

    /// Base URL of the storage origin. Default: `{public_url or bind:port}/storage`
    #[serde(default)]
    pub origin_url: Option<String>,

    /// Timeout for server-side upstream fetches (probe and proxy)
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
}

/// Thresholds and delays for the viewer-side security monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Outer minus inner viewport size that suggests a docked inspector
    #[serde(default = "default_devtools_size_threshold_px")]
    pub devtools_size_threshold_px: u32,

    #[serde(default = "default_timing_threshold_ms")]
    pub console_timing_threshold_ms: u64,

    #[serde(default = "default_timing_threshold_ms")]
    pub debugger_pause_threshold_ms: u64,

    #[serde(default = "default_large_resize_threshold_px")]
    pub large_resize_threshold_px: u32,

    #[serde(default = "default_violation_display_ms")]
    pub violation_display_ms: u64,

    #[serde(default = "default_refocus_show_delay_ms")]
    pub refocus_show_delay_ms: u64,

    #[serde(default = "default_printscreen_show_delay_ms")]
    pub printscreen_show_delay_ms: u64,

    #[serde(default = "default_platform_key_show_delay_ms")]
    pub platform_key_show_delay_ms: u64,

    /// Blur radius applied while content is hidden
    #[serde(default = "default_blur_px")]
    pub blur_px: u32,

    /// Text written over the clipboard after a PrintScreen press
    #[serde(default = "default_clipboard_overwrite_text")]
    pub clipboard_overwrite_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_port() -> u16 {
    31480
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_max_upload_bytes() -> usize {
    26_214_400 // 25MB
}
fn default_auth_algorithm() -> String {
    "HS256".to_string()
}
fn default_url_ttl_secs() -> u64 {
    300
}
fn default_upstream_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_devtools_size_threshold_px() -> u32 {
    160
}
fn default_timing_threshold_ms() -> u64 {
    100
}
fn default_large_resize_threshold_px() -> u32 {
    500
}
fn default_violation_display_ms() -> u64 {
    3000
}
fn default_refocus_show_delay_ms() -> u64 {
    100
}
fn default_printscreen_show_delay_ms() -> u64 {
    2000
}
fn default_platform_key_show_delay_ms() -> u64 {
    1000
}
fn default_blur_px() -> u32 {
    20
}
fn default_clipboard_overwrite_text() -> String {
    "Screenshots are disabled for this document".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
            public_url: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: default_auth_algorithm(),
            secret: String::new(),
            public_key_file: None,
            issuer: None,
            audience: None,
            users_file: None,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url_ttl_secs: default_url_ttl_secs(),
            signing_key: None,
            origin_url: None,
            upstream_timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            devtools_size_threshold_px: default_devtools_size_threshold_px(),
            console_timing_threshold_ms: default_timing_threshold_ms(),
            debugger_pause_threshold_ms: default_timing_threshold_ms(),
            large_resize_threshold_px: default_large_resize_threshold_px(),
            violation_display_ms: default_violation_display_ms(),
            refocus_show_delay_ms: default_refocus_show_delay_ms(),
            printscreen_show_delay_ms: default_printscreen_show_delay_ms(),
            platform_key_show_delay_ms: default_platform_key_show_delay_ms(),
            blur_px: default_blur_px(),
            clipboard_overwrite_text: default_clipboard_overwrite_text(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        let path = paths.config_file();

        if !path.exists() {
            // Create default config file on first run
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let mut config = Self::load_from(&path)?;
        config.paths = paths;
        Ok(config)
    }

    /// Parse a config file without touching the XDG directories.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.expand_env_vars();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    fn expand_env_vars(&mut self) {
        self.auth.secret = expand_env(&self.auth.secret);
        if let Some(ref mut key) = self.delivery.signing_key {
            *key = expand_env(key);
        }
    }

    /// Object store root directory.
    pub fn storage_root(&self) -> PathBuf {
        match self.storage.root {
            Some(ref root) => PathBuf::from(shellexpand::tilde(root).to_string()),
            None => self.paths.objects_dir(),
        }
    }

    /// Base URL the storage origin is reachable at, without a trailing slash.
    pub fn origin_base(&self) -> String {
        if let Some(ref origin) = self.delivery.origin_url {
            return origin.trim_end_matches('/').to_string();
        }
        let base = match self.server.public_url {
            Some(ref public) => public.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.server.bind, self.server.port),
        };
        format!("{}/storage", base)
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["server", "max_upload_bytes"] => Ok(self.server.max_upload_bytes.to_string()),
            ["auth", "algorithm"] => Ok(self.auth.algorithm.clone()),
            ["auth", "issuer"] => Ok(self.auth.issuer.clone().unwrap_or_default()),
            ["auth", "audience"] => Ok(self.auth.audience.clone().unwrap_or_default()),
            ["auth", "users_file"] => Ok(self.auth.users_file.clone().unwrap_or_default()),
            ["storage", "root"] => Ok(self.storage_root().display().to_string()),
            ["delivery", "url_ttl_secs"] => Ok(self.delivery.url_ttl_secs.to_string()),
            ["delivery", "origin_url"] => Ok(self.origin_base()),
            ["monitor", "poll_interval_ms"] => Ok(self.monitor.poll_interval_ms.to_string()),
            ["monitor", "violation_display_ms"] => {
                Ok(self.monitor.violation_display_ms.to_string())
            }
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["server", "port"] => self.server.port = value.parse()?,
            ["server", "bind"] => self.server.bind = value.to_string(),
            ["server", "max_upload_bytes"] => self.server.max_upload_bytes = value.parse()?,
            ["auth", "algorithm"] => match value {
                "HS256" | "RS256" => self.auth.algorithm = value.to_string(),
                _ => anyhow::bail!("Unsupported auth algorithm: {}", value),
            },
            ["auth", "issuer"] => self.auth.issuer = non_empty(value),
            ["auth", "audience"] => self.auth.audience = non_empty(value),
            ["auth", "users_file"] => self.auth.users_file = non_empty(value),
            ["storage", "root"] => self.storage.root = non_empty(value),
            ["delivery", "url_ttl_secs"] => self.delivery.url_ttl_secs = value.parse()?,
            ["delivery", "origin_url"] => self.delivery.origin_url = non_empty(value),
            ["monitor", "poll_interval_ms"] => self.monitor.poll_interval_ms = value.parse()?,
            ["monitor", "violation_display_ms"] => {
                self.monitor.violation_display_ms = value.parse()?
            }
            ["logging", "level"] => self.logging.level = value.to_string(),
            ["logging", "format"] => self.logging.format = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `${VAR}` / `$VAR` expansion. An unset variable expands to the empty
/// string so a placeholder is never mistaken for a secret.
fn expand_env(s: &str) -> String {
    let var_name = s
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| s.strip_prefix('$'));
    match var_name {
        Some(name) => std::env::var(name).unwrap_or_default(),
        None => s.to_string(),
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# docguard configuration
# Auto-created on first run. Edit as needed.

[server]
port = 31480
bind = "127.0.0.1"
# max_upload_bytes = 26214400
# public_url = "https://docs.example.com"

[auth]
# "HS256" verifies tokens with a shared secret, "RS256" with a PEM public key
algorithm = "HS256"
secret = "${DOCGUARD_AUTH_SECRET}"
# public_key_file = "/etc/docguard/issuer.pem"
# issuer = "https://issuer.example.com"
# audience = "docguard"
# users_file = "/etc/docguard/users.json"

[storage]
# root = "~/.local/share/docguard/objects"

[delivery]
url_ttl_secs = 300
# signing_key = "${DOCGUARD_SIGNING_KEY}"   # default: key file in the data dir
# origin_url = "https://cdn.example.com/storage"
upstream_timeout_secs = 30

# Viewer-side security monitor
[monitor]
poll_interval_ms = 1000
devtools_size_threshold_px = 160
console_timing_threshold_ms = 100
debugger_pause_threshold_ms = 100
large_resize_threshold_px = 500
violation_display_ms = 3000
refocus_show_delay_ms = 100
printscreen_show_delay_ms = 2000
platform_key_show_delay_ms = 1000

[logging]
level = "info"
format = "text"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.server.port, 31480);
        assert_eq!(config.delivery.url_ttl_secs, 300);
        assert_eq!(config.monitor.poll_interval_ms, 1000);
        assert_eq!(config.monitor.devtools_size_threshold_px, 160);
        assert_eq!(config.monitor.large_resize_threshold_px, 500);
        assert_eq!(config.monitor.violation_display_ms, 3000);
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.auth.algorithm, "HS256");
        assert_eq!(config.monitor.printscreen_show_delay_ms, 2000);
        assert_eq!(config.monitor.platform_key_show_delay_ms, 1000);
        assert_eq!(config.monitor.refocus_show_delay_ms, 100);
    }

    #[test]
    fn get_and_set_roundtrip() {
        let mut config = Config::default();
        config.set_value("server.port", "9000").unwrap();
        config.set_value("auth.issuer", "https://issuer.test").unwrap();
        assert_eq!(config.get_value("server.port").unwrap(), "9000");
        assert_eq!(config.get_value("auth.issuer").unwrap(), "https://issuer.test");

        config.set_value("auth.issuer", "").unwrap();
        assert!(config.auth.issuer.is_none());
    }

    #[test]
    fn unknown_keys_and_bad_values_rejected() {
        let mut config = Config::default();
        assert!(config.get_value("server.nope").is_err());
        assert!(config.set_value("server.port", "not-a-port").is_err());
        assert!(config.set_value("auth.algorithm", "none").is_err());
    }

    #[test]
    fn origin_base_prefers_explicit_origin() {
        let mut config = Config::default();
        assert_eq!(config.origin_base(), "http://127.0.0.1:31480/storage");

        config.server.public_url = Some("https://docs.example.com/".to_string());
        assert_eq!(config.origin_base(), "https://docs.example.com/storage");

        config.delivery.origin_url = Some("https://cdn.example.com/o/".to_string());
        assert_eq!(config.origin_base(), "https://cdn.example.com/o");
    }

    #[test]
    fn load_from_expands_secrets() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        // SAFETY: test-only env mutation with a variable unique to this test
        unsafe { std::env::set_var("DOCGUARD_TEST_AUTH_SECRET", "s3cret") };
        fs::write(
            &path,
            "[auth]\nsecret = \"${DOCGUARD_TEST_AUTH_SECRET}\"\n[delivery]\nsigning_key = \"plain\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(config.delivery.signing_key.as_deref(), Some("plain"));
    }

    #[test]
    fn unset_placeholder_expands_to_empty() {
        assert_eq!(expand_env("${DOCGUARD_TEST_SURELY_UNSET_VAR}"), "");
        assert_eq!(expand_env("literal"), "literal");
    }
}
