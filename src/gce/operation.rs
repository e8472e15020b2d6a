// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::thread;
use std::time::Instant;

use log;

use super::compute::{Compute, ComputeApi};
use super::GceError;

const STATUS_DONE: &str = "DONE";

#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OperationErrorEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationErrorEntry>,
}

/// A long running Compute API request.
#[derive(serde::Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub operation_type: String,
    pub status: String,
    pub self_link: String,
    #[serde(default)]
    pub target_link: String,
    pub error: Option<OperationErrors>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == STATUS_DONE
    }

    /// Outcome of a finished operation, only the first error is reported.
    pub fn result(&self) -> Result<(), GceError> {
        match self.error.as_ref().and_then(|e| e.errors.first()) {
            None => Ok(()),
            Some(entry) => Err(GceError::Operation {
                name: self.name.clone(),
                code: entry.code.clone(),
                message: entry.message.clone(),
            }),
        }
    }
}

/// Where an operation lives, which decides how it is fetched.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Scope {
    Global,
    Region,
    Zone,
}

impl<A> Compute<A>
where
    A: ComputeApi,
{
    fn operation_scope(&self, op: &Operation) -> Result<Scope, GceError> {
        let base = format!("{}{}", self.base_path(), self.project());
        let scopes = [
            (format!("{}/global/", base), Scope::Global),
            (format!("{}/regions/{}/", base, self.region()), Scope::Region),
            (format!("{}/zones/{}/", base, self.zone()), Scope::Zone),
        ];
        scopes
            .into_iter()
            .find(|(prefix, _)| op.self_link.starts_with(prefix.as_str()))
            .map(|(_, scope)| scope)
            .ok_or_else(|| GceError::OperationScope {
                name: op.name.clone(),
                link: op.self_link.clone(),
            })
    }

    fn operation_path(&self, scope: Scope, name: &str) -> String {
        let rest = format!("operations/{}", name);
        match scope {
            Scope::Global => self.global_path(&rest),
            Scope::Region => self.region_path(&rest),
            Scope::Zone => self.zone_path(&rest),
        }
    }

    /// Polls the operation until it is done and returns the finished
    /// operation, or the error it carries.
    pub fn wait_for_operation(&mut self, op: Operation) -> Result<Operation, GceError> {
        if op.is_done() {
            log::debug!(
                "operation {} {}: DONE, error: {:?}",
                op.operation_type,
                op.target_link,
                op.error
            );
            op.result()?;
            return Ok(op);
        }

        let path = self.operation_path(self.operation_scope(&op)?, &op.name);
        // A timeout too large to represent means no deadline.
        let deadline = Instant::now().checked_add(self.operation_timeout);

        loop {
            let live: Operation = self.get(&path).map_err(|err| GceError::OperationLookup {
                name: op.name.clone(),
                err: Box::new(err),
            })?;
            log::debug!(
                "operation {} {}: {}",
                live.operation_type,
                live.target_link,
                live.status
            );
            if live.is_done() {
                live.result()?;
                return Ok(live);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(GceError::Timeout {
                    name: op.name.clone(),
                    timeout: self.operation_timeout,
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}
