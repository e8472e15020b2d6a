// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use log;

use super::compute::{Compute, ComputeApi};
use super::operation::Operation;
use super::resources::BACKEND_PORT_NAME;
use super::GceError;

pub const INSTANCE_GROUP_NAME: &str = "cockroach-group";

mod types {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    pub struct NamedPort<'a> {
        pub name: &'a str,
        pub port: u16,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InstanceGroup<'a> {
        pub name: &'a str,
        pub named_ports: Vec<NamedPort<'a>>,
    }

    #[derive(Serialize)]
    pub struct InstanceReference<'a> {
        pub instance: &'a str,
    }

    #[derive(Serialize)]
    pub struct InstancesRequest<'a> {
        pub instances: Vec<InstanceReference<'a>>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListInstancesRequest<'a> {
        pub instance_state: &'a str,
    }

    #[derive(Deserialize, Debug)]
    pub struct InstanceWithStatus {
        pub instance: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct InstanceList {
        #[serde(default)]
        pub items: Vec<InstanceWithStatus>,
        pub next_page_token: Option<String>,
    }
}

impl<A> Compute<A>
where
    A: ComputeApi,
{
    /// Creates the zonal unmanaged cockroach instance group unless it exists.
    /// Returns its link.
    pub fn ensure_instance_group(&mut self, port: u16) -> Result<String, GceError> {
        let collection = self.zone_path("instanceGroups");
        self.find_or_create(
            "instance group",
            &collection,
            INSTANCE_GROUP_NAME,
            &types::InstanceGroup {
                name: INSTANCE_GROUP_NAME,
                named_ports: vec![types::NamedPort {
                    name: BACKEND_PORT_NAME,
                    port,
                }],
            },
        )
    }

    fn change_group_membership(
        &mut self,
        action: &str,
        instance_link: &str,
    ) -> Result<(), GceError> {
        let path = self.zone_path(&format!("instanceGroups/{}/{}", INSTANCE_GROUP_NAME, action));
        let op: Operation = self.post(
            &path,
            &types::InstancesRequest {
                instances: vec![types::InstanceReference {
                    instance: instance_link,
                }],
            },
        )?;
        self.wait_for_operation(op).map(|_| ())
    }

    /// Links of all instances in the cockroach instance group, running or
    /// not.
    pub fn instance_group_members(&mut self) -> Result<Vec<String>, GceError> {
        let path = self.zone_path(&format!("instanceGroups/{}/listInstances", INSTANCE_GROUP_NAME));
        let mut members = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page_path = match &page_token {
                Some(token) => format!("{}?pageToken={}", path, token),
                None => path.clone(),
            };
            let list: types::InstanceList = self.post(
                &page_path,
                &types::ListInstancesRequest {
                    instance_state: "ALL",
                },
            )?;
            members.extend(list.items.into_iter().map(|i| i.instance));
            match list.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(members),
            }
        }
    }

    /// Adds an instance, given by its link, to the cockroach instance group.
    /// An instance which is a member already is left alone.
    pub fn add_instance_to_group(&mut self, instance_link: &str) -> Result<(), GceError> {
        if self.instance_group_members()?.iter().any(|m| m == instance_link) {
            log::debug!("{} already in {}", instance_link, INSTANCE_GROUP_NAME);
            return Ok(());
        }
        log::debug!("adding {} to {}", instance_link, INSTANCE_GROUP_NAME);
        self.change_group_membership("addInstances", instance_link)
    }

    /// Removes an instance, given by its link, from the cockroach instance
    /// group. An instance which is not a member is left alone.
    pub fn remove_instance_from_group(&mut self, instance_link: &str) -> Result<(), GceError> {
        if !self.instance_group_members()?.iter().any(|m| m == instance_link) {
            log::debug!("{} not in {}", instance_link, INSTANCE_GROUP_NAME);
            return Ok(());
        }
        log::debug!("removing {} from {}", instance_link, INSTANCE_GROUP_NAME);
        self.change_group_membership("removeInstances", instance_link)
    }

    pub fn find_instance_group(&mut self) -> Result<Option<String>, GceError> {
        let path = self.zone_path(&format!("instanceGroups/{}", INSTANCE_GROUP_NAME));
        Ok(self
            .find::<super::resources::Resource>(&path)?
            .map(|r| r.self_link))
    }
}
