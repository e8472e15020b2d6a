// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use serde::de::DeserializeOwned;

use super::AwsError;
use crate::runner::{ToolCommandBuilder, ToolRunner};

const AWS_BINARY: &str = "aws";
const ERROR_CODE_MARKER: &str = "An error occurred (";

/// Extracts the AWS error code from the stderr of a failed aws CLI call, eg.
/// "An error occurred (InvalidPermission.Duplicate) when calling ...".
pub fn error_code(stderr: &str) -> Option<&str> {
    let start = stderr.find(ERROR_CODE_MARKER)? + ERROR_CODE_MARKER.len();
    let len = stderr[start..].find(')')?;
    Some(&stderr[start..start + len])
}

/// Region scoped wrapper around the aws command line tool.
pub struct AwsCli<R>
where
    R: ToolRunner,
{
    runner: R,
    region: String,
}

impl<R> AwsCli<R>
where
    R: ToolRunner,
{
    pub fn new(runner: R, region: &str) -> Self {
        Self {
            runner,
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn run(
        &mut self,
        service: &str,
        operation: &'static str,
        args: Vec<String>,
    ) -> Result<Vec<u8>, AwsError> {
        self.runner
            .run(
                ToolCommandBuilder::new(AWS_BINARY)
                    .args(["--region", self.region.as_str(), "--output", "json"])
                    .args([service, operation])
                    .args(args)
                    .build(),
            )
            .map_err(|err| AwsError::Call { operation, err })
    }

    /// Runs an aws operation and parses its JSON response.
    pub fn call<T: DeserializeOwned>(
        &mut self,
        service: &str,
        operation: &'static str,
        args: Vec<String>,
    ) -> Result<T, AwsError> {
        let out = self.run(service, operation, args)?;
        serde_json::from_slice(&out).map_err(|err| AwsError::Parse { operation, err })
    }

    /// Runs an aws operation whose response is not needed.
    pub fn call_unit(
        &mut self,
        service: &str,
        operation: &'static str,
        args: Vec<String>,
    ) -> Result<(), AwsError> {
        self.run(service, operation, args).map(|_| ())
    }
}
