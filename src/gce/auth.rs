// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! OAuth access token for the Compute API. Tokens come from gcloud and are
//! cached in a JSON file at the configured token path.

use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log;
use thiserror;

use crate::runner::{output_lines, RunnerError, ToolCommandBuilder, ToolRunner};

const GCLOUD_BINARY: &str = "gcloud";
// Leave some slack for long running commands.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("cannot read token cache {path}: {err}")]
    Read { path: PathBuf, err: io::Error },
    #[error("cannot write token cache {path}: {err}")]
    Write { path: PathBuf, err: io::Error },
    #[error("cannot encode token: {0}")]
    Encode(serde_json::Error),
    #[error("cannot parse gcloud token output: {0}")]
    Decode(serde_json::Error),
    #[error("gcloud failed: {0}")]
    Gcloud(RunnerError),
    #[error("gcloud returned no access token")]
    EmptyToken,
}

/// Token as stored in the cache file.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self.expiry > now + Duration::minutes(EXPIRY_MARGIN_MINUTES)
    }
}

pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: &Path) -> Self {
        TokenCache {
            path: path.to_path_buf(),
        }
    }

    /// Returns the cached token. A missing or unreadable cache is treated as
    /// empty.
    pub fn load(&self) -> Result<Option<CachedToken>, AuthError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AuthError::Read {
                    path: self.path.clone(),
                    err,
                })
            }
        };
        match serde_json::from_slice(&data) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                log::warn!(
                    "ignoring malformed token cache {}: {}",
                    self.path.display(),
                    err
                );
                Ok(None)
            }
        }
    }

    pub fn store(&self, token: &CachedToken) -> Result<(), AuthError> {
        let werr = |err: io::Error| AuthError::Write {
            path: self.path.clone(),
            err,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(werr)?;
        }
        let data = serde_json::to_vec_pretty(token).map_err(AuthError::Encode)?;

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut f = opts.open(&self.path).map_err(werr)?;
        f.write_all(&data).map_err(werr)
    }
}

/// Output of 'gcloud auth print-access-token --format=json'.
#[derive(serde::Deserialize, Debug)]
struct IssuedToken {
    #[serde(default)]
    token: String,
    token_expiry: Option<String>,
}

/// Parses the token expiry reported by gcloud, which is UTC with or without
/// an explicit offset.
fn parse_expiry(expiry: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(expiry) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(expiry, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

fn print_access_token<R: ToolRunner>(
    runner: &mut R,
    now: DateTime<Utc>,
) -> Result<CachedToken, AuthError> {
    let out = runner
        .run(
            ToolCommandBuilder::new(GCLOUD_BINARY)
                .args(["auth", "print-access-token", "--format=json"])
                .build(),
        )
        .map_err(AuthError::Gcloud)?;
    if output_lines(&out).is_empty() {
        return Err(AuthError::EmptyToken);
    }
    let issued: IssuedToken = serde_json::from_slice(&out).map_err(AuthError::Decode)?;
    if issued.token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    // Without a known expiry the token is only good for this run.
    let expiry = match issued.token_expiry.as_deref().and_then(parse_expiry) {
        Some(expiry) => expiry,
        None => {
            log::warn!("gcloud did not report token expiry, not caching the token");
            now
        }
    };
    Ok(CachedToken {
        access_token: issued.token,
        expiry,
    })
}

/// Returns a valid access token, from the cache if possible. Otherwise asks
/// gcloud for a new one, going through the interactive login if gcloud has
/// no credentials, and caches it.
pub fn access_token<R: ToolRunner>(
    cache: &TokenCache,
    runner: &mut R,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    if let Some(token) = cache.load()? {
        if token.is_valid(now) {
            log::debug!("using cached token from {}", cache.path.display());
            return Ok(token.access_token);
        }
        log::info!("cached token expired, requesting new one");
    }

    let token = match print_access_token(runner, now) {
        Ok(token) => token,
        Err(err) => {
            log::info!("cannot get token ({}), logging in", err);
            runner
                .run(
                    ToolCommandBuilder::new(GCLOUD_BINARY)
                        .args(["auth", "login"])
                        .passthrough()
                        .build(),
                )
                .map_err(AuthError::Gcloud)?;
            print_access_token(runner, now)?
        }
    };
    if !token.is_valid(now) {
        log::warn!(
            "gcloud issued a token expiring at {}, it may expire during this run",
            token.expiry
        );
    }

    cache.store(&token)?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{failed, ok, MockRunner};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_cached_token_validity() {
        let token = CachedToken {
            access_token: "ya29.token".to_string(),
            expiry: now() + Duration::minutes(30),
        };
        assert!(token.is_valid(now()));
        assert!(!token.is_valid(now() + Duration::minutes(26)));
        assert!(!CachedToken {
            access_token: String::new(),
            ..token
        }
        .is_valid(now()));
    }

    #[test]
    fn test_uses_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(&dir.path().join("gce_token"));
        cache
            .store(&CachedToken {
                access_token: "ya29.cached".to_string(),
                expiry: now() + Duration::minutes(40),
            })
            .unwrap();

        let mut runner = MockRunner::new(vec![]);
        assert_eq!(
            access_token(&cache, &mut runner, now()).unwrap(),
            "ya29.cached"
        );
        assert!(runner.calls().borrow().is_empty());
    }

    #[test]
    fn test_refreshes_expired_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine").join("gce_token");
        let cache = TokenCache::new(&path);
        cache
            .store(&CachedToken {
                access_token: "ya29.old".to_string(),
                expiry: now() - Duration::minutes(1),
            })
            .unwrap();

        let mut runner = MockRunner::new(vec![ok(
            r#"{"token": "ya29.fresh", "token_expiry": "2025-03-01T12:59:30Z"}"#,
        )]);
        let calls = runner.calls();
        assert_eq!(
            access_token(&cache, &mut runner, now()).unwrap(),
            "ya29.fresh"
        );
        assert_eq!(
            calls.borrow_mut().pop_front().unwrap(),
            vec!["gcloud", "auth", "print-access-token", "--format=json"]
        );
        assert_eq!(
            cache.load().unwrap(),
            Some(CachedToken {
                access_token: "ya29.fresh".to_string(),
                expiry: now() + Duration::seconds(59 * 60 + 30),
            })
        );
    }

    #[test]
    fn test_near_expiry_token_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(&dir.path().join("gce_token"));

        // gcloud hands out its own cached token, which has two minutes left.
        let mut runner = MockRunner::new(vec![
            ok(r#"{"token": "ya29.stale", "token_expiry": "2025-03-01T12:02:00Z"}"#),
            ok(r#"{"token": "ya29.renewed", "token_expiry": "2025-03-01T13:02:00"}"#),
        ]);
        let calls = runner.calls();
        assert_eq!(
            access_token(&cache, &mut runner, now()).unwrap(),
            "ya29.stale"
        );
        assert_eq!(
            cache.load().unwrap().map(|t| t.expiry),
            Some(now() + Duration::minutes(2))
        );

        let later = now() + Duration::minutes(1);
        assert_eq!(
            access_token(&cache, &mut runner, later).unwrap(),
            "ya29.renewed"
        );
        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(
            cache.load().unwrap().map(|t| t.expiry),
            Some(now() + Duration::minutes(62))
        );
    }

    #[test]
    fn test_token_without_expiry_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(&dir.path().join("gce_token"));
        let mut runner = MockRunner::new(vec![
            ok(r#"{"token": "ya29.first"}"#),
            ok(r#"{"token": "ya29.second"}"#),
        ]);
        assert_eq!(access_token(&cache, &mut runner, now()).unwrap(), "ya29.first");
        assert_eq!(access_token(&cache, &mut runner, now()).unwrap(), "ya29.second");
    }

    #[test]
    fn test_login_when_gcloud_has_no_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(&dir.path().join("gce_token"));
        fs::write(dir.path().join("gce_token"), b"not json").unwrap();

        let mut runner = MockRunner::new(vec![
            failed("gcloud", "ERROR: (gcloud.auth.print-access-token) no credentialed accounts"),
            ok(""),
            ok(r#"{"token": "ya29.new", "token_expiry": "2025-03-01T13:00:00Z"}"#),
        ]);
        let calls = runner.calls();
        assert_eq!(access_token(&cache, &mut runner, now()).unwrap(), "ya29.new");
        assert_eq!(calls.borrow()[1], vec!["gcloud", "auth", "login"]);
    }

    #[test]
    fn test_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(&dir.path().join("gce_token"));
        let mut runner = MockRunner::new(vec![ok("\n"), ok(""), ok(r#"{"token": ""}"#)]);
        assert!(matches!(
            access_token(&cache, &mut runner, now()),
            Err(AuthError::EmptyToken)
        ));
    }
}
