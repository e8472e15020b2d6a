// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use log;
use thiserror;

use crate::node::{HostConfig, NodeSettings};
use crate::runner::{RunnerError, ToolCommandBuilder, ToolRunner};

const DOCKER_BINARY: &str = "docker";
const DOCKER_VERSION_PREFIX: &str = "Docker version ";
const COCKROACH_IMAGE: &str = "cockroachdb/cockroach";

/// Wraps docker errors.
#[derive(thiserror::Error, Debug)]
pub enum DockerError {
    #[error("docker {action} failed: {err}")]
    Tool {
        action: &'static str,
        err: RunnerError,
    },
    #[error("bad output {0:?} for docker -v, expected prefix \"Docker version \"")]
    Version(String),
}

/// The container runtime running cockroach on the machines.
pub trait ContainerRuntime {
    /// Verify docker is installed and runnable.
    fn check(&mut self) -> Result<(), DockerError>;
    /// Initialize the store of the first node.
    fn run_init<C: NodeSettings>(
        &mut self,
        flags: &[String],
        node: &HostConfig<C>,
    ) -> Result<(), DockerError>;
    /// Start the cockroach container on a node.
    fn run_start<C: NodeSettings>(
        &mut self,
        flags: &[String],
        node: &HostConfig<C>,
        port: u16,
    ) -> Result<(), DockerError>;
}

/// Arguments of the container initializing the first node's store.
pub fn init_args<C: NodeSettings>(node: &HostConfig<C>) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:/data", node.data_dir()),
        COCKROACH_IMAGE.to_string(),
        "init".to_string(),
        "-insecure".to_string(),
        "-stores".to_string(),
        "ssd=/data".to_string(),
    ]
}

/// Arguments of the long running cockroach container.
pub fn start_args<C: NodeSettings>(node: &HostConfig<C>, port: u16) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "-v".to_string(),
        format!("{}:/data", node.data_dir()),
        "-p".to_string(),
        format!("{}:{}", port, port),
        "--net".to_string(),
        "host".to_string(),
        COCKROACH_IMAGE.to_string(),
        "start".to_string(),
        "-insecure".to_string(),
        "-stores".to_string(),
        "ssd=/data".to_string(),
        "-addr".to_string(),
        format!("{}:{}", node.ip_address(), port),
        "-gossip".to_string(),
        format!("{}:{}", node.gossip_address(), port),
    ]
}

/// Container runtime which uses the 'docker' command.
pub struct Docker<R>
where
    R: ToolRunner,
{
    runner: R,
}

impl<R> Docker<R>
where
    R: ToolRunner,
{
    pub fn new(r: R) -> Self {
        Self { runner: r }
    }

    fn run_container(
        &mut self,
        action: &'static str,
        flags: &[String],
        args: Vec<String>,
    ) -> Result<(), DockerError> {
        let cmd = ToolCommandBuilder::new(DOCKER_BINARY)
            .args(flags.iter().cloned())
            .args(args)
            .passthrough()
            .build();
        log::info!("running: docker {}", cmd.args().join(" "));
        self.runner
            .run(cmd)
            .map(|_| ())
            .map_err(|err| DockerError::Tool { action, err })
    }
}

impl<R> ContainerRuntime for Docker<R>
where
    R: ToolRunner,
{
    fn check(&mut self) -> Result<(), DockerError> {
        let out = self
            .runner
            .run(ToolCommandBuilder::new(DOCKER_BINARY).arg("-v").build())
            .map_err(|err| DockerError::Tool {
                action: "version",
                err,
            })?;
        let out = String::from_utf8_lossy(&out).trim().to_string();
        if out.lines().count() != 1 || !out.starts_with(DOCKER_VERSION_PREFIX) {
            return Err(DockerError::Version(out));
        }
        Ok(())
    }

    fn run_init<C: NodeSettings>(
        &mut self,
        flags: &[String],
        node: &HostConfig<C>,
    ) -> Result<(), DockerError> {
        self.run_container("init", flags, init_args(node))
    }

    fn run_start<C: NodeSettings>(
        &mut self,
        flags: &[String],
        node: &HostConfig<C>,
        port: u16,
    ) -> Result<(), DockerError> {
        self.run_container("start", flags, start_args(node, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{failed, ok, MockRunner};

    struct Settings;

    impl NodeSettings for Settings {
        fn data_dir(&self) -> &str {
            "/home/ubuntu/data"
        }
        fn ip_address(&self) -> &str {
            "172.31.10.5"
        }
        fn gossip_address(&self) -> &str {
            "cockroach-db-123.us-east-1.elb.amazonaws.com"
        }
    }

    fn host() -> HostConfig<Settings> {
        HostConfig {
            name: "cockroach-0".to_string(),
            driver: Settings,
        }
    }

    fn flags() -> Vec<String> {
        vec!["--tlsverify".to_string(), "-H=tcp://54.1.2.3:2376".to_string()]
    }

    #[test]
    fn test_check() {
        let r = MockRunner::new(vec![ok("Docker version 1.8.1, build d12ea79\n")]);
        let mut d = Docker::new(r);
        assert!(d.check().is_ok());

        let r = MockRunner::new(vec![ok("docker 1.8.1\n")]);
        let mut d = Docker::new(r);
        assert!(matches!(d.check(), Err(DockerError::Version(_))));
    }

    #[test]
    fn test_run_init() {
        let r = MockRunner::new(vec![ok("")]);
        let calls = r.calls();
        let mut d = Docker::new(r);
        d.run_init(&flags(), &host()).expect("unexpected error");
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec![
                "docker",
                "--tlsverify",
                "-H=tcp://54.1.2.3:2376",
                "run",
                "--rm",
                "-v",
                "/home/ubuntu/data:/data",
                "cockroachdb/cockroach",
                "init",
                "-insecure",
                "-stores",
                "ssd=/data",
            ]
        );
    }

    #[test]
    fn test_run_start() {
        let r = MockRunner::new(vec![ok("")]);
        let calls = r.calls();
        let mut d = Docker::new(r);
        d.run_start(&flags(), &host(), 26257)
            .expect("unexpected error");
        assert_eq!(
            calls.borrow_mut().pop_front().expect("expected a call"),
            vec![
                "docker",
                "--tlsverify",
                "-H=tcp://54.1.2.3:2376",
                "run",
                "-d",
                "-v",
                "/home/ubuntu/data:/data",
                "-p",
                "26257:26257",
                "--net",
                "host",
                "cockroachdb/cockroach",
                "start",
                "-insecure",
                "-stores",
                "ssd=/data",
                "-addr",
                "172.31.10.5:26257",
                "-gossip",
                "cockroach-db-123.us-east-1.elb.amazonaws.com:26257",
            ]
        );
    }

    #[test]
    fn test_run_start_failure() {
        let r = MockRunner::new(vec![failed("docker", "")]);
        let mut d = Docker::new(r);
        match d.run_start(&flags(), &host(), 8080) {
            Err(DockerError::Tool { action, .. }) => assert_eq!(action, "start"),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
