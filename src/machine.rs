// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use log;
use serde::de::DeserializeOwned;
use thiserror;

use crate::runner::{output_lines, RunnerError, ToolCommandBuilder, ToolRunner};

const DOCKER_MACHINE_BINARY: &str = "docker-machine";
const DOCKER_MACHINE_VERSION_PREFIX: &str = "docker-machine version ";

/// Wraps docker-machine errors.
#[derive(thiserror::Error, Debug)]
pub enum MachineError {
    #[error("docker-machine {action} failed: {err}")]
    Tool {
        action: &'static str,
        err: RunnerError,
    },
    #[error("bad output {0:?} for docker-machine -v, expected prefix \"docker-machine version \"")]
    Version(String),
    #[error("cannot parse config of machine {name}: {err}")]
    Config {
        name: String,
        err: serde_json::Error,
    },
    #[error("expected a single line of docker flags for machine {name}, got: {output:?}")]
    Flags { name: String, output: Vec<String> },
}

/// Parsed output of 'docker-machine inspect'. Only the fields used here are
/// listed, D is the driver specific part.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct MachineInfo<D> {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DriverName")]
    pub driver_name: String,
    #[serde(rename = "Driver")]
    pub driver: D,
}

/// The machine provisioning tool.
pub trait MachineTool {
    /// Verify the tool is installed and runnable.
    fn check(&mut self) -> Result<(), MachineError>;
    /// Names of all machines known to the tool.
    fn list(&mut self) -> Result<Vec<String>, MachineError>;
    /// Print the machine listing to the terminal.
    fn print_list(&mut self) -> Result<(), MachineError>;
    /// Typed machine configuration.
    fn inspect<D: DeserializeOwned>(&mut self, name: &str) -> Result<MachineInfo<D>, MachineError>;
    /// Flags to pass to docker to talk to the daemon of a machine.
    fn docker_flags(&mut self, name: &str) -> Result<Vec<String>, MachineError>;
    /// Create a new machine using the given docker-machine driver.
    fn create(&mut self, driver: &str, args: &[String], name: &str) -> Result<(), MachineError>;
    fn start(&mut self, name: &str) -> Result<(), MachineError>;
    fn stop(&mut self, name: &str) -> Result<(), MachineError>;
}

/// Machine tool which uses the 'docker-machine' command.
pub struct DockerMachine<R>
where
    R: ToolRunner,
{
    runner: R,
}

impl<R> DockerMachine<R>
where
    R: ToolRunner,
{
    pub fn new(r: R) -> Self {
        Self { runner: r }
    }

    fn run(&mut self, action: &'static str, args: &[&str]) -> Result<Vec<u8>, MachineError> {
        self.runner
            .run(
                ToolCommandBuilder::new(DOCKER_MACHINE_BINARY)
                    .args(args.iter().copied())
                    .build(),
            )
            .map_err(|err| MachineError::Tool { action, err })
    }

    fn run_passthrough(&mut self, action: &'static str, args: Vec<String>) -> Result<(), MachineError> {
        self.runner
            .run(
                ToolCommandBuilder::new(DOCKER_MACHINE_BINARY)
                    .args(args)
                    .passthrough()
                    .build(),
            )
            .map(|_| ())
            .map_err(|err| MachineError::Tool { action, err })
    }
}

impl<R> MachineTool for DockerMachine<R>
where
    R: ToolRunner,
{
    fn check(&mut self) -> Result<(), MachineError> {
        let out = self.run("version", &["-v"])?;
        let out = String::from_utf8_lossy(&out).trim().to_string();
        if !out.starts_with(DOCKER_MACHINE_VERSION_PREFIX) {
            return Err(MachineError::Version(out));
        }
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<String>, MachineError> {
        self.run("ls", &["ls", "-q"]).map(|out| output_lines(&out))
    }

    fn print_list(&mut self) -> Result<(), MachineError> {
        self.run_passthrough("ls", vec!["ls".to_string()])
    }

    fn inspect<D: DeserializeOwned>(&mut self, name: &str) -> Result<MachineInfo<D>, MachineError> {
        let out = self.run("inspect", &["inspect", name])?;
        serde_json::from_slice::<MachineInfo<D>>(&out).map_err(|err| MachineError::Config {
            name: name.to_string(),
            err,
        })
    }

    fn docker_flags(&mut self, name: &str) -> Result<Vec<String>, MachineError> {
        let out = output_lines(&self.run("config", &["config", name])?);
        if out.len() != 1 {
            return Err(MachineError::Flags {
                name: name.to_string(),
                output: out,
            });
        }
        Ok(out[0].split_whitespace().map(|f| f.to_string()).collect())
    }

    fn create(&mut self, driver: &str, args: &[String], name: &str) -> Result<(), MachineError> {
        log::info!("creating docker-machine {}", name);

        let mut cmdargs = vec![
            "create".to_string(),
            "--driver".to_string(),
            driver.to_string(),
        ];
        cmdargs.extend(args.iter().cloned());
        cmdargs.push(name.to_string());
        self.run_passthrough("create", cmdargs)
    }

    fn start(&mut self, name: &str) -> Result<(), MachineError> {
        log::info!("starting docker-machine {}", name);
        self.run_passthrough("start", vec!["start".to_string(), name.to_string()])
    }

    fn stop(&mut self, name: &str) -> Result<(), MachineError> {
        log::info!("stopping docker-machine {}", name);
        self.run_passthrough("stop", vec!["stop".to_string(), name.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{failed, ok, MockRunner};

    const AWS_INSPECT: &str = r##"{
    "ConfigVersion": 1,
    "Driver": {
        "IPAddress": "54.1.2.3",
        "MachineName": "cockroach-0",
        "SSHUser": "ubuntu",
        "InstanceId": "i-0a1b2c3d",
        "SecurityGroupId": "sg-12345",
        "PrivateIPAddress": "172.31.10.5",
        "Zone": "a",
        "Region": "us-east-1"
    },
    "DriverName": "amazonec2",
    "HostOptions": {"Driver": ""},
    "Name": "cockroach-0"
}"##;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct TestDriver {
        #[serde(rename = "InstanceId")]
        instance_id: String,
        #[serde(rename = "Zone")]
        zone: String,
    }

    #[test]
    fn test_check() {
        let r = MockRunner::new(vec![ok("docker-machine version 0.16.2, build bd45ab13\n")]);
        let calls = r.calls();
        let mut m = DockerMachine::new(r);
        assert!(m.check().is_ok());
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec!["docker-machine", "-v"]
        );
    }

    #[test]
    fn test_check_bad_version() {
        let r = MockRunner::new(vec![ok("something else\n")]);
        let mut m = DockerMachine::new(r);
        match m.check() {
            Err(MachineError::Version(out)) => assert_eq!(out, "something else"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_list() {
        let r = MockRunner::new(vec![ok("cockroach-0\nother-machine\n\ncockroach-1\n")]);
        let calls = r.calls();
        let mut m = DockerMachine::new(r);
        assert_eq!(
            m.list().expect("unexpected error"),
            vec!["cockroach-0", "other-machine", "cockroach-1"]
        );
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec!["docker-machine", "ls", "-q"]
        );
    }

    #[test]
    fn test_list_failure() {
        let r = MockRunner::new(vec![failed("docker-machine", "open /root/.docker/machine: permission denied")]);
        let mut m = DockerMachine::new(r);
        match m.list() {
            Err(MachineError::Tool { action, err }) => {
                assert_eq!(action, "ls");
                assert!(err.stderr().contains("permission denied"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_inspect() {
        let r = MockRunner::new(vec![ok(AWS_INSPECT)]);
        let calls = r.calls();
        let mut m = DockerMachine::new(r);
        let info = m
            .inspect::<TestDriver>("cockroach-0")
            .expect("unexpected error");
        assert_eq!(
            info,
            MachineInfo {
                name: "cockroach-0".to_string(),
                driver_name: "amazonec2".to_string(),
                driver: TestDriver {
                    instance_id: "i-0a1b2c3d".to_string(),
                    zone: "a".to_string(),
                },
            }
        );
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec!["docker-machine", "inspect", "cockroach-0"]
        );
    }

    #[test]
    fn test_inspect_bad_json() {
        let r = MockRunner::new(vec![ok("not json")]);
        let mut m = DockerMachine::new(r);
        assert!(matches!(
            m.inspect::<TestDriver>("cockroach-0"),
            Err(MachineError::Config { .. })
        ));
    }

    #[test]
    fn test_docker_flags() {
        let r = MockRunner::new(vec![ok(
            "--tlsverify --tlscacert=\"/home/u/.docker/machine/certs/ca.pem\" -H=tcp://54.1.2.3:2376\n",
        )]);
        let mut m = DockerMachine::new(r);
        assert_eq!(
            m.docker_flags("cockroach-0").expect("unexpected error"),
            vec![
                "--tlsverify",
                "--tlscacert=\"/home/u/.docker/machine/certs/ca.pem\"",
                "-H=tcp://54.1.2.3:2376"
            ]
        );
    }

    #[test]
    fn test_docker_flags_multiline() {
        let r = MockRunner::new(vec![ok("--tlsverify\n-H=tcp://54.1.2.3:2376\n")]);
        let mut m = DockerMachine::new(r);
        match m.docker_flags("cockroach-0") {
            Err(MachineError::Flags { name, output }) => {
                assert_eq!(name, "cockroach-0");
                assert_eq!(output.len(), 2);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_create() {
        let r = MockRunner::new(vec![ok("")]);
        let calls = r.calls();
        let mut m = DockerMachine::new(r);
        m.create(
            "amazonec2",
            &["--amazonec2-region".to_string(), "us-east-1".to_string()],
            "cockroach-3",
        )
        .expect("unexpected error");
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec![
                "docker-machine",
                "create",
                "--driver",
                "amazonec2",
                "--amazonec2-region",
                "us-east-1",
                "cockroach-3"
            ]
        );
    }

    #[test]
    fn test_stop_failure() {
        let r = MockRunner::new(vec![failed("docker-machine", "Host does not exist")]);
        let mut m = DockerMachine::new(r);
        match m.stop("cockroach-9") {
            Err(MachineError::Tool { action, err }) => {
                assert_eq!(action, "stop");
                assert_eq!(err.stderr(), "Host does not exist");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
