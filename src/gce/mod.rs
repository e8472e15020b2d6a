// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Driver for Google Compute Engine.

use core::time::Duration;
use std::io;
use std::path::PathBuf;

use chrono::Utc;
use log;
use thiserror;

use crate::config::ClusterContext;
use crate::driver::{require, MissingField, NodeDriver};
use crate::machine::MachineInfo;
use crate::node::{HostConfig, NodeSettings};
use crate::runner::ToolRunner;

mod auth;
mod compute;
mod instance_groups;
mod operation;
mod resources;

use auth::{AuthError, TokenCache};
use compute::{Compute, ComputeApi, ComputeError, ComputeService};

const DOCKER_MACHINE_DRIVER_NAME: &str = "google";
const GOOGLE_DATA_DIR: &str = "/home/docker-user/data";
const DEFAULT_ZONE: &str = "b";

#[derive(thiserror::Error, Debug)]
pub enum GceError {
    #[error("no {0} configured")]
    Config(&'static str),
    #[error("could not get OAuth token: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error("invalid project {project:?}: {err}")]
    Project { project: String, err: ComputeError },
    #[error("cannot encode request: {0}")]
    Encode(serde_json::Error),
    #[error("operation {name} failed: {code}: {message}")]
    Operation {
        name: String,
        code: String,
        message: String,
    },
    #[error("unsupported operation {name} at {link}, expected global, region or zone")]
    OperationScope { name: String, link: String },
    #[error("could not lookup operation {name}: {err}")]
    OperationLookup { name: String, err: Box<GceError> },
    #[error("timed out after {timeout:?} waiting for operation {name}")]
    Timeout { name: String, timeout: Duration },
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Machine(#[from] MissingField),
}

/// The google specific fields of the docker-machine config. Not all are
/// listed, only those used here.
#[derive(serde::Deserialize, Debug, Clone, Default)]
pub struct GoogleMachine {
    #[serde(rename = "MachineName")]
    machine_name: Option<String>,
    #[serde(rename = "Zone")]
    zone: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(rename = "networkIP", default)]
    network_ip: String,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Instance {
    self_link: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

/// Settings of a GCE node.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleNode {
    pub instance_link: String,
    pub network_ip: String,
    pub forwarding_address: String,
}

impl NodeSettings for GoogleNode {
    fn data_dir(&self) -> &str {
        GOOGLE_DATA_DIR
    }

    fn ip_address(&self) -> &str {
        &self.network_ip
    }

    fn gossip_address(&self) -> &str {
        &self.forwarding_address
    }
}

/// GCE driver, bound to a project and a zone of one region.
pub struct Google<A>
where
    A: ComputeApi,
{
    compute: Compute<A>,
    port: u16,
    token_path: PathBuf,
}

impl Google<ComputeService> {
    /// Obtains an access token and validates the project.
    pub fn init<R: ToolRunner>(
        ctx: &ClusterContext,
        region: &str,
        mut runner: R,
    ) -> Result<Self, GceError> {
        let token_path = ctx
            .gce_token_path
            .clone()
            .ok_or(GceError::Config("GCE auth token path"))?;
        let token = auth::access_token(&TokenCache::new(&token_path), &mut runner, Utc::now())?;
        Self::init_with_api(ctx, region, ComputeService::new(token)?)
    }
}

impl<A> Google<A>
where
    A: ComputeApi,
{
    pub fn init_with_api(ctx: &ClusterContext, region: &str, api: A) -> Result<Self, GceError> {
        let project = ctx
            .gce_project
            .clone()
            .ok_or(GceError::Config("GCE project"))?;
        let token_path = ctx
            .gce_token_path
            .clone()
            .ok_or(GceError::Config("GCE auth token path"))?;
        let zone = format!(
            "{}-{}",
            region,
            ctx.zone.as_deref().unwrap_or(DEFAULT_ZONE)
        );

        let mut compute = Compute::new(api, &project, region, &zone)
            .with_polling(ctx.poll_interval, ctx.operation_timeout);
        compute.check_project()?;
        log::info!("validated project name: {:?}", project);

        Ok(Google {
            compute,
            port: ctx.port,
            token_path,
        })
    }

    fn forwarding_address(&mut self) -> Result<String, GceError> {
        match self.compute.find_forwarding_rule()? {
            Some(rule) => Ok(rule.ip_address),
            None => Err(GceError::NotFound(format!(
                "forwarding rule {} not found, the cluster is probably not initialized",
                resources::FORWARDING_RULE_NAME
            ))),
        }
    }
}

impl<A> NodeDriver for Google<A>
where
    A: ComputeApi,
{
    type Machine = GoogleMachine;
    type Config = GoogleNode;
    type Error = GceError;

    fn docker_machine_driver(&self) -> &'static str {
        DOCKER_MACHINE_DRIVER_NAME
    }

    fn create_args(&self) -> Vec<String> {
        vec![
            "--google-project".to_string(),
            self.compute.project().to_string(),
            "--google-zone".to_string(),
            self.compute.zone().to_string(),
            "--google-auth-token".to_string(),
            self.token_path.display().to_string(),
        ]
    }

    fn node_config(
        &mut self,
        name: &str,
        machine: MachineInfo<GoogleMachine>,
    ) -> Result<HostConfig<GoogleNode>, GceError> {
        let m = machine.driver;
        let machine_name = require(name, "MachineName", &m.machine_name)?;
        let zone = m
            .zone
            .filter(|z| !z.is_empty())
            .unwrap_or_else(|| self.compute.zone().to_string());

        let path = format!(
            "{}/zones/{}/instances/{}",
            self.compute.project(),
            zone,
            machine_name
        );
        let instance: Instance = self.compute.get(&path)?;
        let network_ip = instance
            .network_interfaces
            .into_iter()
            .map(|i| i.network_ip)
            .find(|ip| !ip.is_empty())
            .ok_or_else(|| {
                GceError::NotFound(format!("instance {} has no internal IP", machine_name))
            })?;
        let forwarding_address = self.forwarding_address()?;

        Ok(HostConfig {
            name: name.to_string(),
            driver: GoogleNode {
                instance_link: instance.self_link,
                network_ip,
                forwarding_address,
            },
        })
    }

    fn after_first_node(&mut self) -> Result<(), GceError> {
        self.compute.ensure_load_balancer(self.port).map(|_| ())
    }

    fn start_node(&mut self, name: &str, cfg: &HostConfig<GoogleNode>) -> Result<(), GceError> {
        log::info!("adding node {} to instance group", name);
        self.compute.add_instance_to_group(&cfg.driver.instance_link)
    }

    fn stop_node(&mut self, name: &str, cfg: &HostConfig<GoogleNode>) -> Result<(), GceError> {
        log::info!("removing node {} from instance group", name);
        self.compute
            .remove_instance_from_group(&cfg.driver.instance_link)
    }

    fn print_status(&mut self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "Project: {}", self.compute.project())?;
        writeln!(out, "Zone: {}", self.compute.zone())?;

        match self.compute.find_forwarding_rule() {
            Ok(Some(rule)) => writeln!(out, "Load balancer: {}", rule.ip_address)?,
            Ok(None) => writeln!(
                out,
                "Load balancer: not found (you need to initialize the cluster)"
            )?,
            Err(err) => writeln!(out, "Load balancer: problem: {}", err)?,
        }

        match self.compute.find_instance_group() {
            Ok(Some(link)) => writeln!(out, "Instance group: {}", link)?,
            Ok(None) => writeln!(
                out,
                "Instance group: not found (you need to initialize the cluster)"
            )?,
            Err(err) => writeln!(out, "Instance group: problem: {}", err)?,
        }
        Ok(())
    }
}
