// SPDX-FileCopyrightText: 2024 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use log;
use serde;
use serde_yml;
use thiserror;

/// Name of the optional configuration file.
pub const CONFIG_FILE_NAME: &'static str = "cockroach-deploy.yaml";

const DEFAULT_CERTS: &str = "certs";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GCE_TOKEN_PATH: &str = ".docker/machine/gce_token";
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no region specified, expected <provider>:<region name>")]
    MissingRegion,
    #[error("invalid region syntax, expected <provider>:<region name>, got: {0:?}")]
    InvalidRegion(String),
    #[error("unknown provider {0:?}, expected one of: aws, gce")]
    UnknownProvider(String),
    #[error("cannot read config file {path}: {err}")]
    Read { path: PathBuf, err: io::Error },
    #[error("cannot load config file {path}: {err}")]
    Load {
        path: PathBuf,
        err: serde_yml::Error,
    },
}

/// Walks up from `start` looking for a file called `name`.
pub fn locate(start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = Some(start);

    while let Some(curdir) = dir {
        log::debug!("checking {}", curdir.display());
        let conf = curdir.join(name);
        if conf.exists() {
            log::debug!("found config {}", conf.display());
            return Some(conf);
        }
        dir = curdir.parent();
    }
    None
}

/// Settings which may come from the command line or the config file. Unset
/// values fall through to the next layer.
#[derive(clap::Args, serde::Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    /// Certificates directory. Generated CA and node certs and keys are
    /// stored there.
    #[arg(long, global = true)]
    pub certs: Option<PathBuf>,

    /// Cockroach node and load balancer port.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Region to run in, as <provider>:<region>. AWS EC2: aws:us-east-1,
    /// Google Compute Engine: gce:us-central1.
    #[arg(long, global = true, env = "COCKROACH_DEPLOY_REGION")]
    pub region: Option<String>,

    /// Zone suffix within the region. Defaults to "a" on AWS and "b" on GCE.
    #[arg(long, global = true)]
    pub zone: Option<String>,

    /// Project name for Google Compute Engine. Defaults to
    /// "cockroach-<local username>".
    #[arg(long, global = true)]
    pub gce_project: Option<String>,

    /// Path to the OAuth token for Google Compute Engine.
    #[arg(long = "gce-auth-token", global = true)]
    #[serde(rename = "gce-auth-token")]
    pub gce_token_path: Option<PathBuf>,

    /// Seconds to wait for a single cloud operation to complete.
    #[arg(long, global = true)]
    pub operation_timeout: Option<u64>,
}

impl Settings {
    /// Fills every unset value from `other`.
    pub fn or(self, other: Settings) -> Settings {
        Settings {
            certs: self.certs.or(other.certs),
            port: self.port.or(other.port),
            region: self.region.or(other.region),
            zone: self.zone.or(other.zone),
            gce_project: self.gce_project.or(other.gce_project),
            gce_token_path: self.gce_token_path.or(other.gce_token_path),
            operation_timeout: self.operation_timeout.or(other.operation_timeout),
        }
    }

    /// Loads settings from a YAML reader.
    pub fn from_reader<R: io::Read>(path: &Path, r: R) -> Result<Settings, ConfigError> {
        serde_yml::from_reader(r).map_err(|err| ConfigError::Load {
            path: path.to_path_buf(),
            err,
        })
    }

    /// Loads settings from a file.
    pub fn from_file(path: &Path) -> Result<Settings, ConfigError> {
        let f = fs::File::open(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            err,
        })?;
        Settings::from_reader(path, f)
    }
}

/// Cloud back-end a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provider {
    Aws,
    Gce,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Aws => write!(f, "aws"),
            Provider::Gce => write!(f, "gce"),
        }
    }
}

/// A parsed <provider>:<region> specifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub provider: Provider,
    pub name: String,
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, name) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidRegion(s.to_string()))?;
        if provider.is_empty() || name.is_empty() {
            return Err(ConfigError::InvalidRegion(s.to_string()));
        }
        let provider = match provider {
            "aws" => Provider::Aws,
            "gce" => Provider::Gce,
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        };
        Ok(Region {
            provider,
            name: name.to_string(),
        })
    }
}

/// Process wide configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    pub certs: PathBuf,
    pub port: u16,
    region: Option<String>,
    pub zone: Option<String>,
    pub gce_project: Option<String>,
    pub gce_token_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
}

fn default_gce_project() -> Option<String> {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .map(|u| format!("cockroach-{}", u))
}

fn default_gce_token_path(home: Option<&Path>) -> Option<PathBuf> {
    home.map(|home| home.join(DEFAULT_GCE_TOKEN_PATH))
}

/// Expands a leading `~` component to the home directory.
fn expand_home(path: PathBuf, home: Option<&Path>) -> PathBuf {
    if let (Ok(rest), Some(home)) = (path.strip_prefix("~"), home) {
        return home.join(rest);
    }
    path
}

impl ClusterContext {
    /// Builds the context from merged settings, applying defaults for
    /// anything left unset.
    pub fn from_settings(s: Settings) -> Self {
        let dirs = BaseDirs::new();
        Self::from_settings_with_home(s, dirs.as_ref().map(|d| d.home_dir()))
    }

    fn from_settings_with_home(s: Settings, home: Option<&Path>) -> Self {
        ClusterContext {
            certs: expand_home(
                s.certs.unwrap_or_else(|| PathBuf::from(DEFAULT_CERTS)),
                home,
            ),
            port: s.port.unwrap_or(DEFAULT_PORT),
            region: s.region.filter(|r| !r.is_empty()),
            zone: s.zone,
            gce_project: s.gce_project.or_else(default_gce_project),
            gce_token_path: s
                .gce_token_path
                .map(|p| expand_home(p, home))
                .or_else(|| default_gce_token_path(home)),
            poll_interval: POLL_INTERVAL,
            operation_timeout: Duration::from_secs(
                s.operation_timeout
                    .unwrap_or(DEFAULT_OPERATION_TIMEOUT_SECS),
            ),
        }
    }

    /// Parses the configured region.
    pub fn region(&self) -> Result<Region, ConfigError> {
        match self.region.as_ref() {
            Some(r) => r.parse(),
            None => Err(ConfigError::MissingRegion),
        }
    }

    /// Effective parameter values, for display.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let unset = || "<unset>".to_string();
        vec![
            ("certs", self.certs.display().to_string()),
            ("port", self.port.to_string()),
            ("region", self.region.clone().unwrap_or_else(unset)),
            ("zone", self.zone.clone().unwrap_or_else(unset)),
            ("gce-project", self.gce_project.clone().unwrap_or_else(unset)),
            (
                "gce-auth-token",
                self.gce_token_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(unset),
            ),
            (
                "operation-timeout",
                self.operation_timeout.as_secs().to_string(),
            ),
        ]
    }
}

#[cfg(test)]
pub fn test_context(region: &str) -> ClusterContext {
    let mut ctx = ClusterContext::from_settings(Settings {
        region: Some(region.to_string()),
        gce_project: Some("cockroach-test".to_string()),
        gce_token_path: Some(PathBuf::from("/tmp/gce_token")),
        ..Default::default()
    });
    ctx.poll_interval = Duration::ZERO;
    ctx
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_region_parse() {
        assert_eq!(
            "aws:us-east-1".parse::<Region>().unwrap(),
            Region {
                provider: Provider::Aws,
                name: "us-east-1".to_string()
            }
        );
        assert_eq!(
            "gce:us-central1".parse::<Region>().unwrap(),
            Region {
                provider: Provider::Gce,
                name: "us-central1".to_string()
            }
        );
    }

    #[test]
    fn test_region_parse_invalid() {
        for bad in ["us-east-1", "aws:", ":us-east-1", ""] {
            match bad.parse::<Region>() {
                Err(ConfigError::InvalidRegion(r)) => assert_eq!(r, bad),
                other => panic!("unexpected result for {:?}: {:?}", bad, other),
            }
        }
        match "azure:westus".parse::<Region>() {
            Err(ConfigError::UnknownProvider(p)) => assert_eq!(p, "azure"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_context_defaults() {
        let ctx = ClusterContext::from_settings(Settings::default());
        assert_eq!(ctx.certs, PathBuf::from("certs"));
        assert_eq!(ctx.port, 8080);
        assert_eq!(ctx.poll_interval, Duration::from_secs(1));
        assert_eq!(ctx.operation_timeout, Duration::from_secs(600));
        assert!(matches!(ctx.region(), Err(ConfigError::MissingRegion)));
    }

    #[test]
    fn test_home_expansion() {
        let settings = Settings {
            certs: Some(PathBuf::from("~/certs")),
            gce_token_path: Some(PathBuf::from("~/.config/gce_token")),
            ..Settings::default()
        };
        let ctx = ClusterContext::from_settings_with_home(
            settings.clone(),
            Some(Path::new("/home/user")),
        );
        assert_eq!(ctx.certs, PathBuf::from("/home/user/certs"));
        assert_eq!(
            ctx.gce_token_path,
            Some(PathBuf::from("/home/user/.config/gce_token"))
        );

        // No home directory, paths are kept as given.
        let ctx = ClusterContext::from_settings_with_home(settings, None);
        assert_eq!(ctx.certs, PathBuf::from("~/certs"));

        let ctx = ClusterContext::from_settings_with_home(
            Settings {
                certs: Some(PathBuf::from("~other/certs")),
                ..Settings::default()
            },
            Some(Path::new("/home/user")),
        );
        assert_eq!(ctx.certs, PathBuf::from("~other/certs"));
        assert_eq!(
            ctx.gce_token_path,
            Some(PathBuf::from("/home/user/.docker/machine/gce_token"))
        );
    }

    #[test]
    fn test_params() {
        let ctx = ClusterContext::from_settings(Settings {
            region: Some("gce:us-east1".to_string()),
            port: Some(26257),
            ..Settings::default()
        });
        let params = ctx.params();
        assert_eq!(params[0], ("certs", "certs".to_string()));
        assert_eq!(params[1], ("port", "26257".to_string()));
        assert_eq!(params[2], ("region", "gce:us-east1".to_string()));
        assert_eq!(params[3], ("zone", "<unset>".to_string()));
        assert_eq!(params[6], ("operation-timeout", "600".to_string()));
    }

    #[test]
    fn test_settings_layering() {
        let file = Settings {
            port: Some(26257),
            region: Some("aws:us-west-2".to_string()),
            ..Default::default()
        };
        let cli = Settings {
            region: Some("gce:us-central1".to_string()),
            ..Default::default()
        };
        let ctx = ClusterContext::from_settings(cli.or(file));
        assert_eq!(ctx.port, 26257);
        assert_eq!(ctx.region().unwrap().provider, Provider::Gce);
    }

    #[test]
    fn test_settings_from_yaml() {
        let yaml = "port: 9000\nregion: aws:eu-west-1\ngce-auth-token: /tmp/token\noperation-timeout: 30\n";
        let s = Settings::from_reader(Path::new("test.yaml"), yaml.as_bytes()).unwrap();
        assert_eq!(s.port, Some(9000));
        assert_eq!(s.region.as_deref(), Some("aws:eu-west-1"));
        assert_eq!(s.gce_token_path, Some(PathBuf::from("/tmp/token")));
        assert_eq!(s.operation_timeout, Some(30));

        let res = Settings::from_reader(Path::new("test.yaml"), "bogus: 1\n".as_bytes());
        assert!(matches!(res, Err(ConfigError::Load { .. })));
    }

    #[test]
    fn test_locate() {
        let top = tempfile::tempdir().unwrap();
        let nested = top.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(locate(&nested, "cockroach-deploy-test-missing.yaml"), None);

        let conf = top.path().join("a").join(CONFIG_FILE_NAME);
        fs::File::create(&conf)
            .unwrap()
            .write_all(b"port: 1234\n")
            .unwrap();
        assert_eq!(locate(&nested, CONFIG_FILE_NAME), Some(conf.clone()));
        assert_eq!(Settings::from_file(&conf).unwrap().port, Some(1234));
    }
}
