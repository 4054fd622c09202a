use crate::domain::{DindError, ImageRef, RegistryAuth};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Version of the nested daemon used when none is given.
pub const DEFAULT_VERSION: &str = "1.10";
pub const DEFAULT_REPOSITORY: &str = "docker";
pub const DIND_TAG_SUFFIX: &str = "-dind";
/// Plain-text API port of the nested daemon.
pub const DOCKER_API_PORT: u16 = 2375;
pub const LOOPBACK: &str = "127.0.0.1";

pub const ENV_VERSION: &str = "DINDTEST_VERSION";
pub const ENV_REPOSITORY: &str = "DINDTEST_REPOSITORY";
pub const ENV_HOST_IP: &str = "DINDTEST_HOST_IP";
pub const ENV_READINESS_ATTEMPTS: &str = "DINDTEST_READINESS_ATTEMPTS";
pub const ENV_READINESS_INTERVAL_MS: &str = "DINDTEST_READINESS_INTERVAL_MS";
pub const ENV_REGISTRY_USER: &str = "DINDTEST_REGISTRY_USER";
pub const ENV_REGISTRY_PASSWORD: &str = "DINDTEST_REGISTRY_PASSWORD";
pub const ENV_REGISTRY_SERVER: &str = "DINDTEST_REGISTRY_SERVER";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            interval_ms: 500,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Everything needed to launch one nested daemon.
///
/// Built explicitly by the caller (`DaemonConfig::default()`, a TOML file, or
/// the `DINDTEST_*` environment) and handed to the handle at construction.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub repository: String,
    pub version: String,
    pub tag_suffix: String,
    pub api_port: u16,
    pub host_ip: String,
    pub privileged: bool,
    pub readiness: ReadinessConfig,
    pub auth: Option<RegistryAuth>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            tag_suffix: DIND_TAG_SUFFIX.to_string(),
            api_port: DOCKER_API_PORT,
            host_ip: LOOPBACK.to_string(),
            privileged: true,
            readiness: ReadinessConfig::default(),
            auth: None,
        }
    }
}

impl DaemonConfig {
    /// Same config running another version; empty means [`DEFAULT_VERSION`].
    pub fn with_version(mut self, version: &str) -> Self {
        let version = version.trim();
        self.version = if version.is_empty() {
            DEFAULT_VERSION.to_string()
        } else {
            version.to_string()
        };
        self
    }

    pub fn with_readiness(mut self, attempts: u32, interval: Duration) -> Self {
        self.readiness = ReadinessConfig {
            attempts,
            interval_ms: interval.as_millis() as u64,
        };
        self
    }

    pub fn tag(&self) -> String {
        let version = if self.version.trim().is_empty() {
            DEFAULT_VERSION
        } else {
            self.version.trim()
        };
        format!("{version}{}", self.tag_suffix)
    }

    pub fn image(&self) -> ImageRef {
        ImageRef::new(self.repository.clone(), self.tag())
    }

    /// Container-side key of the API port, e.g. `"2375/tcp"`.
    pub fn api_port_key(&self) -> String {
        format!("{}/tcp", self.api_port)
    }

    pub fn validate(&self) -> Result<(), DindError> {
        if self.repository.trim().is_empty() {
            return Err(DindError::Config("repository is empty".into()));
        }
        if self.api_port == 0 {
            return Err(DindError::Config("api_port must be non-zero".into()));
        }
        if self.host_ip.trim().is_empty() {
            return Err(DindError::Config("host_ip is empty".into()));
        }
        if self.readiness.attempts == 0 {
            return Err(DindError::Config(
                "readiness.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DindError> {
        let config: Self =
            toml::from_str(content).map_err(|e| DindError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, DindError> {
        let content = fs::read_to_string(path)
            .map_err(|e| DindError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by the `DINDTEST_*` environment variables.
    pub fn from_env() -> Result<Self, DindError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `DINDTEST_*` overrides read through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, DindError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(version) = lookup(ENV_VERSION) {
            self = self.with_version(&version);
        }
        if let Some(repository) = lookup(ENV_REPOSITORY) {
            self.repository = repository;
        }
        if let Some(host_ip) = lookup(ENV_HOST_IP) {
            self.host_ip = host_ip;
        }
        if let Some(raw) = lookup(ENV_READINESS_ATTEMPTS) {
            self.readiness.attempts = parse_var(ENV_READINESS_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_READINESS_INTERVAL_MS) {
            self.readiness.interval_ms = parse_var(ENV_READINESS_INTERVAL_MS, &raw)?;
        }

        match (lookup(ENV_REGISTRY_USER), lookup(ENV_REGISTRY_PASSWORD)) {
            (Some(username), Some(password)) => {
                self.auth = Some(RegistryAuth {
                    username,
                    password,
                    server: lookup(ENV_REGISTRY_SERVER),
                });
            }
            (None, None) => {}
            _ => {
                return Err(DindError::Config(format!(
                    "{ENV_REGISTRY_USER} and {ENV_REGISTRY_PASSWORD} must be set together"
                )));
            }
        }

        self.validate()?;
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, DindError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| DindError::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_dind_image() {
        let config = DaemonConfig::default();
        assert_eq!(config.tag(), "1.10-dind");
        assert_eq!(config.image().to_string(), "docker:1.10-dind");
        assert_eq!(config.api_port_key(), "2375/tcp");
        assert_eq!(config.host_ip, "127.0.0.1");
        assert!(config.privileged);
        assert_eq!(config.readiness.attempts, 4);
        assert_eq!(config.readiness.interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_version_maps_to_default() {
        assert_eq!(DaemonConfig::default().with_version("").tag(), "1.10-dind");
        assert_eq!(DaemonConfig::default().with_version("  ").tag(), "1.10-dind");
        assert_eq!(DaemonConfig::default().with_version("1.9").tag(), "1.9-dind");
    }

    #[test]
    fn test_toml_partial_override() {
        let config = DaemonConfig::from_toml_str(
            r#"
version = "1.8"

[readiness]
attempts = 10
"#,
        )
        .unwrap();

        assert_eq!(config.tag(), "1.8-dind");
        assert_eq!(config.readiness.attempts, 10);
        assert_eq!(config.readiness.interval_ms, 500);
        assert_eq!(config.repository, "docker");
    }

    #[test]
    fn test_toml_rejects_unknown_and_invalid() {
        let err = DaemonConfig::from_toml_str("verison = \"1.8\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = DaemonConfig::from_toml_str("[readiness]\nattempts = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_toml_auth_section() {
        let config = DaemonConfig::from_toml_str(
            r#"
[auth]
username = "ci"
password = "secret"
server = "registry.example.com"
"#,
        )
        .unwrap();

        let auth = config.auth.unwrap();
        assert_eq!(auth.username, "ci");
        assert_eq!(auth.server.as_deref(), Some("registry.example.com"));
    }

    #[test]
    fn test_env_overrides() {
        let config = DaemonConfig::default()
            .with_overrides(lookup(&[
                (ENV_VERSION, "1.9"),
                (ENV_READINESS_ATTEMPTS, "8"),
                (ENV_READINESS_INTERVAL_MS, "250"),
                (ENV_REGISTRY_USER, "ci"),
                (ENV_REGISTRY_PASSWORD, "secret"),
            ]))
            .unwrap();

        assert_eq!(config.tag(), "1.9-dind");
        assert_eq!(config.readiness.attempts, 8);
        assert_eq!(config.readiness.interval_ms, 250);
        assert_eq!(config.auth.unwrap().server, None);
    }

    #[test]
    fn test_env_overrides_reject_bad_values() {
        let err = DaemonConfig::default()
            .with_overrides(lookup(&[(ENV_READINESS_ATTEMPTS, "many")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_READINESS_ATTEMPTS));

        let err = DaemonConfig::default()
            .with_overrides(lookup(&[(ENV_REGISTRY_USER, "ci")]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dindtest.toml");
        fs::write(&path, "repository = \"mirror.local/docker\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.image().to_string(), "mirror.local/docker:1.10-dind");

        let missing = DaemonConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Config);
    }
}
