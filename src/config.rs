use crate::classify::Mode;
use crate::dispatcher::DispatcherOptions;
use crate::store::Driver;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Config file read when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "delaygate.toml";

/// Longest allowed minimum site name length; names are DNS labels
const MAX_MIN_NAME_LENGTH: usize = 32;

/// Every key a config file may contain, per section.
///
/// Checked before deserializing so a typo fails loudly instead of silently
/// falling back to a default.
const ALLOWED_KEYS: &[(&str, &[&str])] = &[
    ("server", &["listen", "deployment_address", "admin_path_prefix"]),
    ("storage", &["driver", "data_source"]),
    ("sites", &["min_name_length", "name_salt", "seed_builtin"]),
];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sites: SitesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on (default: 0.0.0.0:5103)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Public address sites are served under, e.g. `example.com`
    #[serde(default = "default_deployment_address")]
    pub deployment_address: String,

    /// Non-empty switches to single-site mode, configured by POSTs under this path
    #[serde(default)]
    pub admin_path_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            deployment_address: default_deployment_address(),
            admin_path_prefix: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// memory, sqlite or postgres
    #[serde(default = "default_driver")]
    pub driver: String,

    /// SQLite file path or PostgreSQL URL
    #[serde(default)]
    pub data_source: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            data_source: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SitesConfig {
    #[serde(default = "default_min_name_length")]
    pub min_name_length: usize,

    /// Salt for generated site names; change it to get a different name sequence
    #[serde(default)]
    pub name_salt: String,

    /// Create the delay sites 0-199 and status sites 200-599 at startup
    #[serde(default)]
    pub seed_builtin: bool,
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            min_name_length: default_min_name_length(),
            name_salt: String::new(),
            seed_builtin: false,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:5103".to_string()
}

fn default_deployment_address() -> String {
    "localhost:5103".to_string()
}

fn default_driver() -> String {
    "memory".to_string()
}

fn default_min_name_length() -> usize {
    6
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load `path`; a missing file is only tolerated for the default path
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if path == DEFAULT_CONFIG_PATH && !Path::new(path).exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        check_known_keys(&table)?;

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.listen <{}> is not a socket address like 0.0.0.0:5103",
                self.server.listen
            ));
        }

        if self.server.deployment_address.is_empty() {
            errors.push("server.deployment_address must not be empty".to_string());
        }

        let prefix = &self.server.admin_path_prefix;
        if !prefix.is_empty() && !prefix.starts_with('/') {
            errors.push(format!(
                "server.admin_path_prefix <{}> must start with /",
                prefix
            ));
        }

        if let Err(e) = self.driver() {
            errors.push(e.to_string());
        }

        if self.sites.min_name_length > MAX_MIN_NAME_LENGTH {
            errors.push(format!(
                "sites.min_name_length must be at most {}, got {}",
                MAX_MIN_NAME_LENGTH, self.sites.min_name_length
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.listen.parse()?)
    }

    pub fn driver(&self) -> Result<Driver, crate::store::StoreError> {
        self.storage.driver.parse()
    }

    pub fn mode(&self) -> Mode {
        Mode::from_admin_path_prefix(&self.server.admin_path_prefix)
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            mode: self.mode(),
            deployment_address: self.server.deployment_address.clone(),
            name_salt: self.sites.name_salt.clone(),
            min_name_length: self.sites.min_name_length,
            seed_builtin: self.sites.seed_builtin,
        }
    }
}

fn check_known_keys(table: &toml::Table) -> anyhow::Result<()> {
    for (section, value) in table {
        let known = ALLOWED_KEYS
            .iter()
            .find(|(name, _)| *name == section.as_str());
        let Some((_, allowed)) = known else {
            let sections: Vec<&str> = ALLOWED_KEYS.iter().map(|(name, _)| *name).collect();
            anyhow::bail!(
                "Unknown section [{}]. Allowed sections: {}",
                section,
                sections.join(", ")
            );
        };

        let Some(keys) = value.as_table() else {
            anyhow::bail!("[{}] must be a table", section);
        };

        for key in keys.keys() {
            if !allowed.contains(&key.as_str()) {
                anyhow::bail!(
                    "Unknown key <{}> in [{}]. Allowed keys: {}",
                    key,
                    section,
                    allowed.join(", ")
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:8000"
deployment_address = "delay.example.com"

[storage]
driver = "sqlite3"
data_source = "/var/lib/delaygate/rules.db"

[sites]
min_name_length = 8
name_salt = "pepper"
seed_builtin = true
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.listen_addr().unwrap().port(), 8000);
        assert_eq!(config.server.deployment_address, "delay.example.com");
        assert_eq!(config.driver().unwrap(), Driver::Sqlite);
        assert_eq!(config.storage.data_source, "/var/lib/delaygate/rules.db");
        assert_eq!(config.sites.min_name_length, 8);
        assert!(config.sites.seed_builtin);
        assert_eq!(config.mode(), Mode::MultiTenant);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:5103");
        assert_eq!(config.server.deployment_address, "localhost:5103");
        assert_eq!(config.driver().unwrap(), Driver::Memory);
        assert_eq!(config.sites.min_name_length, 6);
        assert!(!config.sites.seed_builtin);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse("[server]\nlisten_on = \"0.0.0.0:1\"\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Unknown key <listen_on> in [server]"), "{}", message);
        assert!(message.contains("listen, deployment_address, admin_path_prefix"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let err = Config::parse("[metrics]\nenabled = true\n").unwrap_err();
        assert!(err.to_string().contains("Unknown section [metrics]"));
    }

    #[test]
    fn test_top_level_value_rejected() {
        assert!(Config::parse("listen = \"0.0.0.0:1\"\n").is_err());
        assert!(Config::parse("server = 5\n").is_err());
    }

    #[test]
    fn test_validation_errors_collected() {
        let toml = r#"
[server]
listen = "nowhere"
admin_path_prefix = "admin"

[storage]
driver = "mysql"

[sites]
min_name_length = 100
"#;
        let message = Config::parse(toml).unwrap_err().to_string();
        assert!(message.contains("server.listen <nowhere>"));
        assert!(message.contains("must start with /"));
        assert!(message.contains("Unknown storage driver <mysql>"));
        assert!(message.contains("at most 32"));
    }

    #[test]
    fn test_single_site_mode() {
        let config = Config::parse("[server]\nadmin_path_prefix = \"/admin\"\n").unwrap();
        assert!(config.mode().is_single_site());
        assert!(config.dispatcher_options().mode.is_single_site());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sites]\nname_salt = \"from file\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sites.name_salt, "from file");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load_or_default("/nonexistent/delaygate.toml").is_err());
    }
}
