// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::io;
use std::process::{Command, Stdio};

use log;
use thiserror;

/// How the output of a tool is handled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputMode {
    /// Stdout is collected and returned to the caller.
    Capture,
    /// Stdout and stderr are forwarded to the terminal.
    Passthrough,
}

/// A fully built invocation of an external tool.
#[derive(Debug)]
pub struct ToolCommand {
    cmd: Command,
    mode: OutputMode,
}

impl ToolCommand {
    /// Name of the executed program.
    pub fn program(&self) -> String {
        self.cmd.get_program().to_string_lossy().to_string()
    }

    /// Arguments of the invocation, without the program name.
    pub fn args(&self) -> Vec<String> {
        self.cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }
}

/// Builds a command line for one of the external tools.
pub struct ToolCommandBuilder {
    program: &'static str,
    args: Vec<String>,
    mode: OutputMode,
}

impl ToolCommandBuilder {
    pub fn new(program: &'static str) -> Self {
        Self {
            program,
            args: Vec::new(),
            mode: OutputMode::Capture,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Forward the tool output to the terminal instead of capturing it.
    pub fn passthrough(mut self) -> Self {
        self.mode = OutputMode::Passthrough;
        self
    }

    pub fn build(self) -> ToolCommand {
        let mut cmd = Command::new(self.program);
        cmd.args(self.args);
        ToolCommand {
            cmd,
            mode: self.mode,
        }
    }
}

/// Wraps tool runner errors.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("cannot start {program}: {err}")]
    Start { program: String, err: io::Error },
    #[error("{program} exited with status {exit_code}, stderr:\n{stderr}")]
    Execution {
        program: String,
        stderr: String,
        exit_code: i32,
    },
}

impl RunnerError {
    /// Standard error of a failed invocation, empty if the tool never ran or
    /// its output was not captured.
    pub fn stderr(&self) -> &str {
        match self {
            RunnerError::Start { .. } => "",
            RunnerError::Execution { stderr, .. } => stderr,
        }
    }
}

/// Trait representing a way to run external tools.
pub trait ToolRunner {
    /// Runs a command returning its output (stdout). Passthrough commands
    /// return an empty output.
    fn run(&mut self, cmd: ToolCommand) -> Result<Vec<u8>, RunnerError>;
}

/// Runs tools as child processes.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&mut self, toolcmd: ToolCommand) -> Result<Vec<u8>, RunnerError> {
        let program = toolcmd.program();
        let mode = toolcmd.mode();
        let mut cmd = toolcmd.cmd;

        log::trace!(
            "running {} ({:?}) with: {:?}",
            program,
            mode,
            cmd.get_args()
                .by_ref()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
        );

        if mode == OutputMode::Passthrough {
            let status = cmd
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(|err| RunnerError::Start {
                    program: program.clone(),
                    err,
                })?;
            if !status.success() {
                return Err(RunnerError::Execution {
                    program,
                    stderr: String::new(),
                    exit_code: status.code().unwrap_or(255),
                });
            }
            return Ok(Vec::new());
        }

        let res = match cmd.output() {
            Ok(output) => output,
            Err(err) => {
                return Err(RunnerError::Start { program, err });
            }
        };

        if !res.status.success() {
            return Err(RunnerError::Execution {
                program,
                stderr: String::from_utf8_lossy(&res.stderr).trim().to_string(),
                exit_code: res.status.code().unwrap_or(255),
            });
        }
        return Ok(res.stdout);
    }
}

/// Splits captured output into trimmed, non-empty lines.
pub fn output_lines(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
