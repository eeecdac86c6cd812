//! Layered configuration: defaults < YAML file < `HARVEST_*` environment <
//! command-line flags.
//!
//! Every layer is a [`ConfigLayer`] of optional values; layers are merged in
//! precedence order and resolved once into a [`ResolvedConfig`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use harvest_core::{normalize_seeds, GroupId, HierarchyPolicy};
use harvest_engine::{
    FetchSettings, HarvestSettings, RetryPolicy, XmlNamespaces, DEFAULT_API_NAMESPACE,
};
use serde::Deserialize;
use thiserror::Error;

use crate::cli::GlobalArgs;

pub const ENV_PREFIX: &str = "HARVEST_";
pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid value {value:?} for {key}: {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
    #[error("no session directory: set HARVEST_SESSION_DIR or session-dir in the config file")]
    NoSessionDir,
}

/// One configuration source. `None` leaves the value to a lower layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigLayer {
    pub base_url: Option<String>,
    pub base_dir: Option<PathBuf>,
    pub session: Option<String>,
    pub session_dir: Option<PathBuf>,
    pub groups: Option<Vec<String>>,
    pub per_page: Option<u32>,
    pub api_namespace: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub dry_run: Option<bool>,
    pub reject_multi_parent: Option<bool>,
}

impl ConfigLayer {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Layer from `HARVEST_*` variables; other variables are ignored.
    pub fn from_env<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut layer = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();
            let key = key.as_ref();
            match name {
                "BASE_URL" => layer.base_url = Some(value),
                "BASE_DIR" => layer.base_dir = Some(PathBuf::from(value)),
                "SESSION" => layer.session = Some(value),
                "SESSION_DIR" => layer.session_dir = Some(PathBuf::from(value)),
                "GROUPS" => layer.groups = Some(vec![value]),
                "PER_PAGE" => layer.per_page = Some(parse_number(key, &value)?),
                "API_NAMESPACE" => layer.api_namespace = Some(value),
                "TIMEOUT_SECS" => layer.timeout_secs = Some(parse_number(key, &value)?),
                "RETRIES" => layer.retries = Some(parse_number(key, &value)?),
                "DRY_RUN" => layer.dry_run = Some(parse_bool(key, &value)?),
                "REJECT_MULTI_PARENT" => {
                    layer.reject_multi_parent = Some(parse_bool(key, &value)?)
                }
                _ => {}
            }
        }
        Ok(layer)
    }

    pub fn from_flags(flags: &GlobalArgs) -> Self {
        Self {
            base_url: flags.base_url.clone(),
            base_dir: flags.base_dir.clone(),
            session: flags.session.clone(),
            dry_run: flags.dry_run.then_some(true),
            ..Self::default()
        }
    }

    /// `self` with every value set in `over` replaced.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            base_url: over.base_url.or(self.base_url),
            base_dir: over.base_dir.or(self.base_dir),
            session: over.session.or(self.session),
            session_dir: over.session_dir.or(self.session_dir),
            groups: over.groups.or(self.groups),
            per_page: over.per_page.or(self.per_page),
            api_namespace: over.api_namespace.or(self.api_namespace),
            timeout_secs: over.timeout_secs.or(self.timeout_secs),
            retries: over.retries.or(self.retries),
            dry_run: over.dry_run.or(self.dry_run),
            reject_multi_parent: over.reject_multi_parent.or(self.reject_multi_parent),
        }
    }

    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let per_page = self.per_page.unwrap_or(HarvestSettings::DEFAULT_PER_PAGE);
        if per_page == 0 {
            return Err(ConfigError::InvalidValue {
                key: "per-page".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let session_dir = match self.session_dir {
            Some(dir) => dir,
            None => default_session_dir().ok_or(ConfigError::NoSessionDir)?,
        };
        let hierarchy = if self.reject_multi_parent.unwrap_or(false) {
            HierarchyPolicy::Reject
        } else {
            HierarchyPolicy::Warn
        };

        Ok(ResolvedConfig {
            base_url: self.base_url,
            base_dir: self.base_dir.unwrap_or_else(|| PathBuf::from(".")),
            session: self.session.unwrap_or_else(|| DEFAULT_SESSION.to_string()),
            session_dir,
            groups: normalize_seeds(self.groups.unwrap_or_default()),
            per_page,
            api_namespace: self
                .api_namespace
                .unwrap_or_else(|| DEFAULT_API_NAMESPACE.to_string()),
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            retries: self.retries.unwrap_or(0),
            dry_run: self.dry_run.unwrap_or(false),
            hierarchy,
        })
    }
}

/// Configuration of one invocation, after layering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// May still come from the stored session.
    pub base_url: Option<String>,
    pub base_dir: PathBuf,
    pub session: String,
    pub session_dir: PathBuf,
    pub groups: Vec<GroupId>,
    pub per_page: u32,
    pub api_namespace: String,
    pub timeout: Duration,
    pub retries: u32,
    pub dry_run: bool,
    pub hierarchy: HierarchyPolicy,
}

impl ResolvedConfig {
    /// Layer the config file named by the flags (if any), the process
    /// environment and the flags.
    pub fn load(flags: &GlobalArgs) -> Result<Self, ConfigError> {
        let file = match &flags.config {
            Some(path) => ConfigLayer::from_yaml_file(path)?,
            None => ConfigLayer::default(),
        };
        let env = ConfigLayer::from_env(std::env::vars())?;
        file.merge(env).merge(ConfigLayer::from_flags(flags)).resolve()
    }

    pub fn namespaces(&self) -> XmlNamespaces {
        XmlNamespaces::with_api(self.api_namespace.clone())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: self.timeout,
            ..FetchSettings::default()
        }
    }

    pub fn harvest_settings(&self, base_url: impl Into<String>) -> HarvestSettings {
        HarvestSettings {
            base_url: base_url.into(),
            base_dir: self.base_dir.clone(),
            per_page: self.per_page,
            groups: self.groups.clone(),
            namespaces: self.namespaces(),
            hierarchy: self.hierarchy,
            retry: RetryPolicy {
                attempts: self.retries,
                ..RetryPolicy::default()
            },
            dry_run: self.dry_run,
        }
    }
}

fn default_session_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("feed-harvest").join("sessions"))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        message: err.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            message: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session_dir_layer() -> ConfigLayer {
        ConfigLayer {
            session_dir: Some(PathBuf::from("/sessions")),
            ..ConfigLayer::default()
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = session_dir_layer().resolve().unwrap();
        assert_eq!(config.base_url, None);
        assert_eq!(config.base_dir, PathBuf::from("."));
        assert_eq!(config.session, "default");
        assert_eq!(config.per_page, 25);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retries, 0);
        assert!(!config.dry_run);
        assert!(config.groups.is_empty());
        assert_eq!(config.hierarchy, HierarchyPolicy::Warn);
        assert_eq!(config.api_namespace, DEFAULT_API_NAMESPACE);
    }

    #[test]
    fn later_layers_win() {
        let file = ConfigLayer::from_yaml_str(
            "base-url: https://file.example.org/api\nbase-dir: /from-file\nper-page: 50\ngroups: [\"7\", \"3,4\"]\n",
        )
        .unwrap();
        let env = ConfigLayer::from_env([
            ("HARVEST_BASE_DIR", "/from-env"),
            ("HARVEST_RETRIES", "2"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        let flags = ConfigLayer::from_flags(&GlobalArgs {
            base_dir: Some(PathBuf::from("/from-flag")),
            dry_run: true,
            ..GlobalArgs::default()
        });

        let config = session_dir_layer()
            .merge(file)
            .merge(env)
            .merge(flags)
            .resolve()
            .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("https://file.example.org/api"));
        assert_eq!(config.base_dir, PathBuf::from("/from-flag"));
        assert_eq!(config.per_page, 50);
        assert_eq!(config.retries, 2);
        assert!(config.dry_run);
        assert_eq!(config.groups, vec!["7", "3", "4"]);
    }

    #[test]
    fn unset_flags_do_not_mask_lower_layers() {
        let env = ConfigLayer::from_env([("HARVEST_DRY_RUN", "yes")]).unwrap();
        let config = session_dir_layer()
            .merge(env)
            .merge(ConfigLayer::from_flags(&GlobalArgs::default()))
            .resolve()
            .unwrap();
        assert!(config.dry_run);
    }

    #[test]
    fn env_groups_are_comma_separated() {
        let env = ConfigLayer::from_env([("HARVEST_GROUPS", " 12, 3 ,,12")]).unwrap();
        let config = session_dir_layer().merge(env).resolve().unwrap();
        assert_eq!(config.groups, vec!["12", "3"]);
    }

    #[test]
    fn bad_values_are_reported_with_their_key() {
        let err = ConfigLayer::from_env([("HARVEST_PER_PAGE", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "HARVEST_PER_PAGE"));

        let err = ConfigLayer::from_env([("HARVEST_DRY_RUN", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let zero = ConfigLayer {
            per_page: Some(0),
            ..session_dir_layer()
        };
        assert!(zero.resolve().is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(ConfigLayer::from_yaml_str("base_url: x\n").is_err());
        assert_eq!(ConfigLayer::from_yaml_str("").unwrap(), ConfigLayer::default());
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = ConfigLayer::from_yaml_file(&temp.path().join("harvest.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn reject_multi_parent_selects_the_policy() {
        let layer = ConfigLayer {
            reject_multi_parent: Some(true),
            ..session_dir_layer()
        };
        assert_eq!(layer.resolve().unwrap().hierarchy, HierarchyPolicy::Reject);
    }
}
