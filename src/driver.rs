// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use core::fmt;
use std::error;
use std::io;

use serde::de::DeserializeOwned;
use thiserror;

use crate::machine::MachineInfo;
use crate::node::{HostConfig, NodeSettings};

/// A required key of the docker-machine driver config is absent or empty.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("config of machine {machine} is missing required field Driver.{field}")]
pub struct MissingField {
    pub machine: String,
    pub field: &'static str,
}

/// Returns the value of a required machine config field.
pub fn require(
    machine: &str,
    field: &'static str,
    value: &Option<String>,
) -> Result<String, MissingField> {
    match value {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(MissingField {
            machine: machine.to_string(),
            field,
        }),
    }
}

/// Per cloud provider implementation of the node lifecycle. A driver value
/// is only handed out by the provider's init once credentials and session
/// state are set up.
pub trait NodeDriver {
    /// Provider specific part of the docker-machine config.
    type Machine: DeserializeOwned;
    /// Provider specific node settings.
    type Config: NodeSettings + fmt::Debug;
    type Error: error::Error + Send + Sync + 'static;

    /// Name of the docker-machine driver.
    fn docker_machine_driver(&self) -> &'static str;

    /// Driver specific arguments to 'docker-machine create'.
    fn create_args(&self) -> Vec<String>;

    /// Resolves live node settings from its machine config.
    fn node_config(
        &mut self,
        name: &str,
        machine: MachineInfo<Self::Machine>,
    ) -> Result<HostConfig<Self::Config>, Self::Error>;

    /// Sets up cluster wide resources once the first node exists. Safe to call
    /// again on a partially set up cluster.
    fn after_first_node(&mut self) -> Result<(), Self::Error>;

    /// Steps for every new node, including the first one.
    fn add_node(
        &mut self,
        _name: &str,
        _config: &HostConfig<Self::Config>,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Puts the node into the set of machines receiving traffic.
    fn start_node(
        &mut self,
        name: &str,
        config: &HostConfig<Self::Config>,
    ) -> Result<(), Self::Error>;

    /// Takes the node out of the set of machines receiving traffic.
    fn stop_node(
        &mut self,
        name: &str,
        config: &HostConfig<Self::Config>,
    ) -> Result<(), Self::Error>;

    /// Writes a read-only status report. Missing resources are reported, not
    /// treated as errors.
    fn print_status(&mut self, out: &mut dyn io::Write) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require() {
        assert_eq!(
            require("cockroach-0", "InstanceId", &Some("i-1".to_string())),
            Ok("i-1".to_string())
        );
        let err = require("cockroach-0", "InstanceId", &Some(String::new())).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config of machine cockroach-0 is missing required field Driver.InstanceId"
        );
        assert_eq!(
            require("cockroach-1", "Zone", &None),
            Err(MissingField {
                machine: "cockroach-1".to_string(),
                field: "Zone"
            })
        );
    }
}
