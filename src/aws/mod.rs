// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Driver for AWS EC2. Cluster traffic goes through a classic ELB in front of
//! the instances; the security group is the one docker-machine creates.
//! Cloud calls go through the aws command line tool.

use std::io;

use log;
use thiserror;

use crate::config::ClusterContext;
use crate::driver::{require, MissingField, NodeDriver};
use crate::machine::MachineInfo;
use crate::node::{HostConfig, NodeSettings};
use crate::runner::{RunnerError, ToolRunner};

mod cli;
pub mod credentials;
mod ec2;
mod elb;

pub use cli::AwsCli;
pub use credentials::Credentials;

const DOCKER_MACHINE_DRIVER_NAME: &str = "amazonec2";
const AMAZON_DATA_DIR: &str = "/home/ubuntu/data";
const DEFAULT_ZONE: &str = "a";

/// Wraps AWS driver errors.
#[derive(thiserror::Error, Debug)]
pub enum AwsError {
    #[error("unable to load AWS credentials: {0}")]
    Credentials(String),
    #[error("aws {operation} failed: {err}")]
    Call {
        operation: &'static str,
        err: RunnerError,
    },
    #[error("cannot parse output of aws {operation}: {err}")]
    Parse {
        operation: &'static str,
        err: serde_json::Error,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Ambiguous(String),
    #[error(transparent)]
    Machine(#[from] MissingField),
}

impl AwsError {
    /// AWS error code of a failed call, if the service reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Call { err, .. } => cli::error_code(err.stderr()),
            _ => None,
        }
    }
}

/// The amazonec2 specific fields of the docker-machine config. Not all are
/// listed, only those used here.
#[derive(serde::Deserialize, Debug, Clone, Default)]
pub struct AmazonMachine {
    #[serde(rename = "InstanceId")]
    instance_id: Option<String>,
    #[serde(rename = "PrivateIPAddress")]
    private_ip_address: Option<String>,
}

/// Settings of an AWS node.
#[derive(Debug, Clone, PartialEq)]
pub struct AmazonNode {
    pub instance_id: String,
    pub private_ip_address: String,
    pub load_balancer_address: String,
}

impl NodeSettings for AmazonNode {
    fn data_dir(&self) -> &str {
        AMAZON_DATA_DIR
    }

    fn ip_address(&self) -> &str {
        &self.private_ip_address
    }

    fn gossip_address(&self) -> &str {
        &self.load_balancer_address
    }
}

/// AWS driver, bound to a single region.
pub struct Amazon<R>
where
    R: ToolRunner,
{
    port: u16,
    zone: String,
    credentials: Credentials,
    vpc_id: String,
    aws: AwsCli<R>,
}

impl<R> Amazon<R>
where
    R: ToolRunner,
{
    /// Resolves credentials and looks up the default VPC of the region.
    pub fn init(ctx: &ClusterContext, region: &str, runner: R) -> Result<Self, AwsError> {
        let credentials = credentials::load(region)?;
        Self::init_with_credentials(ctx, region, credentials, runner)
    }

    pub fn init_with_credentials(
        ctx: &ClusterContext,
        region: &str,
        credentials: Credentials,
        runner: R,
    ) -> Result<Self, AwsError> {
        log::info!("loaded AWS key: {}", credentials.access_key_id);

        let mut aws = AwsCli::new(runner, region);
        let vpc_id = aws.find_default_vpc()?;
        log::info!("found default VPC id: {}", vpc_id);

        Ok(Amazon {
            port: ctx.port,
            zone: ctx.zone.clone().unwrap_or_else(|| DEFAULT_ZONE.to_string()),
            credentials,
            vpc_id,
            aws,
        })
    }

    fn load_balancer_address(&mut self) -> Result<String, AwsError> {
        self.aws.find_load_balancer()?.ok_or_else(|| {
            AwsError::NotFound(format!(
                "load balancer {} not found, the cluster is probably not initialized",
                elb::COCKROACH_ELB_NAME
            ))
        })
    }
}

impl<R> NodeDriver for Amazon<R>
where
    R: ToolRunner,
{
    type Machine = AmazonMachine;
    type Config = AmazonNode;
    type Error = AwsError;

    fn docker_machine_driver(&self) -> &'static str {
        DOCKER_MACHINE_DRIVER_NAME
    }

    fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "--amazonec2-access-key".to_string(),
            self.credentials.access_key_id.clone(),
            "--amazonec2-secret-key".to_string(),
            self.credentials.secret_access_key.clone(),
            "--amazonec2-region".to_string(),
            self.aws.region().to_string(),
            "--amazonec2-vpc-id".to_string(),
            self.vpc_id.clone(),
            "--amazonec2-zone".to_string(),
            self.zone.clone(),
        ];
        if let Some(token) = &self.credentials.session_token {
            args.push("--amazonec2-session-token".to_string());
            args.push(token.clone());
        }
        args
    }

    fn node_config(
        &mut self,
        name: &str,
        machine: MachineInfo<AmazonMachine>,
    ) -> Result<HostConfig<AmazonNode>, AwsError> {
        let m = machine.driver;
        let instance_id = require(name, "InstanceId", &m.instance_id)?;
        let private_ip_address = require(name, "PrivateIPAddress", &m.private_ip_address)?;
        let load_balancer_address = self.load_balancer_address()?;

        Ok(HostConfig {
            name: name.to_string(),
            driver: AmazonNode {
                instance_id,
                private_ip_address,
                load_balancer_address,
            },
        })
    }

    /// Opens the cockroach port in the security group and creates the load
    /// balancer.
    fn after_first_node(&mut self) -> Result<(), AwsError> {
        let security_group_id = self.aws.find_security_group()?.ok_or_else(|| {
            AwsError::NotFound(format!(
                "security group with name {:?} not found",
                ec2::SECURITY_GROUP_NAME
            ))
        })?;

        log::info!("adding security group rule");
        self.aws
            .authorize_cockroach_ingress(self.port, &security_group_id)?;

        self.aws
            .find_or_create_load_balancer(self.port, &self.zone, &security_group_id)
            .map(|_| ())
    }

    // ELB takes forever to notice a node that was stopped and started again,
    // so nodes are removed when stopping and registered again when starting.
    fn start_node(&mut self, name: &str, cfg: &HostConfig<AmazonNode>) -> Result<(), AwsError> {
        log::info!("adding node {} to load balancer", name);
        self.aws.register_instance(&cfg.driver.instance_id)
    }

    fn stop_node(&mut self, name: &str, cfg: &HostConfig<AmazonNode>) -> Result<(), AwsError> {
        log::info!("removing node {} from load balancer", name);
        self.aws.deregister_instance(&cfg.driver.instance_id)
    }

    fn print_status(&mut self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "Region: {}", self.aws.region())?;

        match self.aws.find_load_balancer() {
            Ok(Some(dns_name)) => writeln!(out, "Load balancer: {}", dns_name)?,
            Ok(None) => writeln!(
                out,
                "Load balancer: not found (you need to initialize the cluster)"
            )?,
            Err(err) => writeln!(out, "Load balancer: problem: {}", err)?,
        }

        match self.aws.find_security_group() {
            Ok(Some(id)) => writeln!(out, "Security group: {}", id)?,
            Ok(None) => writeln!(
                out,
                "Security group: not found (you need to initialize the cluster)"
            )?,
            Err(err) => writeln!(out, "Security group: problem: {}", err)?,
        }
        Ok(())
    }
}
