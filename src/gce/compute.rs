// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Thin client for the Compute Engine v1 REST API. Resources are addressed by
//! their path relative to the projects base, eg.
//! `<project>/global/firewalls/cockroach-firewall`.

use core::time::Duration;

use log;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror;

use super::GceError;

/// Base of all project scoped Compute API resources.
pub const COMPUTE_BASE_PATH: &str = "https://www.googleapis.com/compute/v1/projects/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum ComputeError {
    #[error("resource {0} not found")]
    NotFound(String),
    #[error("request for {path} failed: {message} (status {status})")]
    Api {
        path: String,
        status: u16,
        message: String,
    },
    #[error("network error during compute API request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("cannot decode response for {path}: {err}")]
    Decode {
        path: String,
        err: serde_json::Error,
    },
}

/// Access to the Compute API. Paths are relative to [`ComputeApi::base_path`].
pub trait ComputeApi {
    fn base_path(&self) -> &str;
    fn get(&mut self, path: &str) -> Result<Value, ComputeError>;
    fn post(&mut self, path: &str, body: &Value) -> Result<Value, ComputeError>;
}

mod types {
    #[derive(serde::Deserialize, Debug)]
    pub struct ErrorBody {
        #[serde(default)]
        pub message: String,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }
}

/// Compute API over HTTPS, authorized with an OAuth bearer token.
pub struct ComputeService {
    client: Client,
    token: String,
}

impl ComputeService {
    pub fn new(token: String) -> Result<Self, ComputeError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(ComputeService { client, token })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", COMPUTE_BASE_PATH, path)
    }

    fn handle(path: &str, resp: Response) -> Result<Value, ComputeError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ComputeError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let message = match serde_json::from_str::<types::ErrorResponse>(&body) {
                Ok(e) => e.error.message,
                Err(_) => body,
            };
            return Err(ComputeError::Api {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.bytes()?;
        serde_json::from_slice(&body).map_err(|err| ComputeError::Decode {
            path: path.to_string(),
            err,
        })
    }
}

impl ComputeApi for ComputeService {
    fn base_path(&self) -> &str {
        COMPUTE_BASE_PATH
    }

    fn get(&mut self, path: &str) -> Result<Value, ComputeError> {
        log::trace!("GET {}", path);
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()?;
        Self::handle(path, resp)
    }

    fn post(&mut self, path: &str, body: &Value) -> Result<Value, ComputeError> {
        log::trace!("POST {}: {}", path, body);
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()?;
        Self::handle(path, resp)
    }
}

/// Compute API bound to a project, region and zone.
pub struct Compute<A>
where
    A: ComputeApi,
{
    api: A,
    project: String,
    region: String,
    zone: String,
    pub(super) poll_interval: Duration,
    pub(super) operation_timeout: Duration,
}

impl<A> Compute<A>
where
    A: ComputeApi,
{
    pub fn new(api: A, project: &str, region: &str, zone: &str) -> Self {
        Compute {
            api,
            project: project.to_string(),
            region: region.to_string(),
            zone: zone.to_string(),
            poll_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(600),
        }
    }

    /// Sets how often and for how long operations are polled.
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.operation_timeout = timeout;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn base_path(&self) -> &str {
        self.api.base_path()
    }

    #[cfg(test)]
    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn global_path(&self, rest: &str) -> String {
        format!("{}/global/{}", self.project, rest)
    }

    pub fn region_path(&self, rest: &str) -> String {
        format!("{}/regions/{}/{}", self.project, self.region, rest)
    }

    pub fn zone_path(&self, rest: &str) -> String {
        format!("{}/zones/{}/{}", self.project, self.zone, rest)
    }

    /// Fetches a resource.
    pub fn get<T: DeserializeOwned>(&mut self, path: &str) -> Result<T, GceError> {
        let v = self.api.get(path)?;
        serde_json::from_value(v).map_err(|err| {
            GceError::Compute(ComputeError::Decode {
                path: path.to_string(),
                err,
            })
        })
    }

    /// Fetches a resource, None if it does not exist.
    pub fn find<T: DeserializeOwned>(&mut self, path: &str) -> Result<Option<T>, GceError> {
        match self.get(path) {
            Ok(r) => Ok(Some(r)),
            Err(GceError::Compute(ComputeError::NotFound(_))) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Posts to a collection or a resource action. The response is usually
    /// the operation tracking the request.
    pub fn post<B, T>(&mut self, path: &str, body: &B) -> Result<T, GceError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(GceError::Encode)?;
        let v = self.api.post(path, &body)?;
        serde_json::from_value(v).map_err(|err| {
            GceError::Compute(ComputeError::Decode {
                path: path.to_string(),
                err,
            })
        })
    }

    /// Fails unless the project exists and is accessible.
    pub fn check_project(&mut self) -> Result<(), GceError> {
        let project = self.project.clone();
        match self.api.get(&project) {
            Ok(_) => Ok(()),
            Err(err) => Err(GceError::Project { project, err }),
        }
    }
}
