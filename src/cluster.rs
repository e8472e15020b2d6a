// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::error;
use std::io;

use log;
use thiserror;

use crate::docker::{ContainerRuntime, DockerError};
use crate::driver::NodeDriver;
use crate::machine::{MachineError, MachineTool};
use crate::node::{self, HostConfig, IndexExhausted};

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("init called but docker-machine has existing cockroach nodes: {0:?}")]
    AlreadyExists(Vec<String>),
    #[error("no existing cockroach nodes detected, this means there is probably no existing cluster")]
    NotFound,
    #[error("number of nodes must be at least 1")]
    InvalidCount,
    #[error(transparent)]
    Index(#[from] IndexExhausted),
    #[error("failed to get list of existing cockroach nodes: {0}")]
    Discovery(MachineError),
    #[error("could not {step} {node}: {err}")]
    Machine {
        step: &'static str,
        node: String,
        err: MachineError,
    },
    #[error("could not {step} {node}: {err}")]
    Docker {
        step: &'static str,
        node: String,
        err: DockerError,
    },
    #[error("could not {step} {node}: {err}")]
    Driver {
        step: &'static str,
        node: String,
        err: Box<dyn error::Error + Send + Sync>,
    },
    #[error("node {node} was created with the {found} driver, expected {expected}")]
    WrongDriver {
        node: String,
        expected: &'static str,
        found: String,
    },
    #[error("failed to stop nodes: {0:?}")]
    Stop(Vec<String>),
    #[error("cannot write status: {0}")]
    Output(#[from] io::Error),
}

fn driver_error<E>(step: &'static str, node: &str) -> impl FnOnce(E) -> ClusterError
where
    E: error::Error + Send + Sync + 'static,
{
    let node = node.to_string();
    move |err| ClusterError::Driver {
        step,
        node,
        err: Box::new(err),
    }
}

fn machine_error(step: &'static str, node: &str) -> impl FnOnce(MachineError) -> ClusterError {
    let node = node.to_string();
    move |err| ClusterError::Machine { step, node, err }
}

fn docker_error(step: &'static str, node: &str) -> impl FnOnce(DockerError) -> ClusterError {
    let node = node.to_string();
    move |err| ClusterError::Docker { step, node, err }
}

/// Verifies docker-machine and docker are usable and prints the machine
/// listing.
pub fn check_tools<M, C>(machines: &mut M, docker: &mut C) -> Result<(), ClusterError>
where
    M: MachineTool,
    C: ContainerRuntime,
{
    machines
        .check()
        .map_err(machine_error("run", "docker-machine"))?;
    docker.check().map_err(docker_error("run", "docker"))?;
    machines
        .print_list()
        .map_err(machine_error("list", "machines"))
}

/// Runs the cluster lifecycle commands by sequencing the machine tool, the
/// container runtime and the cloud driver.
pub struct Cluster<D, M, C>
where
    D: NodeDriver,
    M: MachineTool,
    C: ContainerRuntime,
{
    driver: D,
    machines: M,
    docker: C,
    port: u16,
}

impl<D, M, C> Cluster<D, M, C>
where
    D: NodeDriver,
    M: MachineTool,
    C: ContainerRuntime,
{
    pub fn new(driver: D, machines: M, docker: C, port: u16) -> Self {
        Cluster {
            driver,
            machines,
            docker,
            port,
        }
    }

    /// Names of existing cluster nodes.
    fn members(&mut self) -> Result<Vec<String>, ClusterError> {
        let all = self.machines.list().map_err(ClusterError::Discovery)?;
        Ok(node::cluster_members(&all))
    }

    fn existing_members(&mut self) -> Result<Vec<String>, ClusterError> {
        let members = self.members()?;
        if members.is_empty() {
            return Err(ClusterError::NotFound);
        }
        Ok(members)
    }

    fn create_machine(&mut self, name: &str) -> Result<(), ClusterError> {
        let args = self.driver.create_args();
        self.machines
            .create(self.driver.docker_machine_driver(), &args, name)
            .map_err(machine_error("create machine", name))
    }

    fn host_config(&mut self, name: &str) -> Result<HostConfig<D::Config>, ClusterError> {
        let info = self
            .machines
            .inspect::<D::Machine>(name)
            .map_err(machine_error("read config of", name))?;
        log::debug!("machine {} uses driver {}", info.name, info.driver_name);
        let expected = self.driver.docker_machine_driver();
        if info.driver_name != expected {
            return Err(ClusterError::WrongDriver {
                node: name.to_string(),
                expected,
                found: info.driver_name,
            });
        }
        let cfg = self
            .driver
            .node_config(name, info)
            .map_err(driver_error("get node config for", name))?;
        log::debug!("node {} config: {:?}", name, cfg);
        Ok(cfg)
    }

    fn start_container(&mut self, cfg: &HostConfig<D::Config>) -> Result<(), ClusterError> {
        let flags = self
            .machines
            .docker_flags(&cfg.name)
            .map_err(machine_error("get docker flags for", &cfg.name))?;
        self.docker
            .run_start(&flags, cfg, self.port)
            .map_err(docker_error("start cockroach node", &cfg.name))
    }

    /// Creates the first node and the cluster wide cloud resources, then
    /// initializes and starts cockroach on it.
    pub fn init(&mut self) -> Result<(), ClusterError> {
        let members = self.members()?;
        if !members.is_empty() {
            return Err(ClusterError::AlreadyExists(members));
        }

        let name = node::node_name(0);
        self.create_machine(&name)?;

        self.driver
            .after_first_node()
            .map_err(driver_error("set up cluster resources after", &name))?;

        let cfg = self.host_config(&name)?;
        self.driver
            .add_node(&name, &cfg)
            .map_err(driver_error("run add node steps for", &name))?;

        let flags = self
            .machines
            .docker_flags(&name)
            .map_err(machine_error("get docker flags for", &name))?;
        self.docker
            .run_init(&flags, &cfg)
            .map_err(docker_error("initialize first cockroach node", &name))?;
        self.start_container(&cfg)?;

        self.driver
            .start_node(&name, &cfg)
            .map_err(driver_error("run start node steps for", &name))?;
        log::info!("cluster initialized, first node {}", name);
        Ok(())
    }

    fn add_one_node(&mut self) -> Result<String, ClusterError> {
        let members = self.existing_members()?;
        let name = node::node_name(node::next_index(&members)?);

        self.create_machine(&name)?;
        let cfg = self.host_config(&name)?;
        self.driver
            .add_node(&name, &cfg)
            .map_err(driver_error("run add node steps for", &name))?;
        self.start_container(&cfg)?;
        self.driver
            .start_node(&name, &cfg)
            .map_err(driver_error("run start node steps for", &name))?;
        Ok(name)
    }

    /// Adds `count` nodes to an existing cluster, one after the other. Nodes
    /// added before a failure are kept.
    pub fn add_nodes(&mut self, count: u32) -> Result<(), ClusterError> {
        if count == 0 {
            return Err(ClusterError::InvalidCount);
        }
        for i in 1..=count {
            log::info!("adding node {} of {}", i, count);
            let name = self.add_one_node()?;
            log::info!("added node {}", name);
        }
        Ok(())
    }

    /// Starts the given nodes, or all cluster nodes if none are given.
    pub fn start(&mut self, nodes: &[String]) -> Result<(), ClusterError> {
        // unknown names are reported by docker-machine
        let nodes = if nodes.is_empty() {
            self.existing_members()?
        } else {
            nodes.to_vec()
        };

        for name in &nodes {
            if let Err(err) = self.machines.start(name) {
                // typically already running
                log::warn!("could not start machine {}: {}", name, err);
            }
            let cfg = self.host_config(name)?;
            self.driver
                .start_node(name, &cfg)
                .map_err(driver_error("run start node steps for", name))?;
            self.start_container(&cfg)?;
        }
        Ok(())
    }

    fn stop_one_node(&mut self, name: &str) -> Result<(), ClusterError> {
        let cfg = self.host_config(name)?;
        self.driver
            .stop_node(name, &cfg)
            .map_err(driver_error("run stop node steps for", name))?;
        self.machines
            .stop(name)
            .map_err(machine_error("stop machine", name))
    }

    /// Stops the given nodes, or all cluster nodes if none are given. Every
    /// node is taken out of the load balancer before its machine is stopped.
    /// A failing node does not prevent stopping the others.
    pub fn stop(&mut self, nodes: &[String]) -> Result<(), ClusterError> {
        let nodes = if nodes.is_empty() {
            self.existing_members()?
        } else {
            nodes.to_vec()
        };

        let mut failed = Vec::new();
        for name in &nodes {
            if let Err(err) = self.stop_one_node(name) {
                log::error!("{}", err);
                failed.push(name.clone());
            }
        }
        if !failed.is_empty() {
            return Err(ClusterError::Stop(failed));
        }
        Ok(())
    }

    /// Writes the driver status report.
    pub fn print_status(&mut self, out: &mut dyn io::Write) -> Result<(), ClusterError> {
        self.driver.print_status(out)?;
        Ok(())
    }
}
