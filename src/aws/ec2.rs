// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use log;

use super::cli::AwsCli;
use super::AwsError;
use crate::runner::ToolRunner;

/// Security group created by docker-machine for its instances.
pub const SECURITY_GROUP_NAME: &str = "docker-machine";
const ALL_IP_ADDRESSES: &str = "0.0.0.0/0";
const COCKROACH_PROTOCOL: &str = "tcp";
const SECURITY_RULE_DUPLICATE: &str = "InvalidPermission.Duplicate";
const SECURITY_GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";

mod types {
    #[derive(serde::Deserialize, Debug)]
    pub struct Vpc {
        #[serde(rename = "VpcId")]
        pub vpc_id: String,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct DescribeVpcs {
        #[serde(rename = "Vpcs", default)]
        pub vpcs: Vec<Vpc>,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct SecurityGroup {
        #[serde(rename = "GroupId")]
        pub group_id: String,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct DescribeSecurityGroups {
        #[serde(rename = "SecurityGroups", default)]
        pub security_groups: Vec<SecurityGroup>,
    }
}

impl<R> AwsCli<R>
where
    R: ToolRunner,
{
    /// Looks up the ID of the default VPC of the region.
    pub fn find_default_vpc(&mut self) -> Result<String, AwsError> {
        let resp: types::DescribeVpcs = self.call(
            "ec2",
            "describe-vpcs",
            vec![
                "--filters".to_string(),
                "Name=isDefault,Values=true".to_string(),
            ],
        )?;

        match resp.vpcs.len() {
            0 => Err(AwsError::NotFound(format!(
                "no default VPC found in region {}",
                self.region()
            ))),
            1 => Ok(resp.vpcs[0].vpc_id.clone()),
            n => Err(AwsError::Ambiguous(format!(
                "found {} default VPCs in region {}",
                n,
                self.region()
            ))),
        }
    }

    /// Looks up the ID of the docker-machine security group. Returns None if
    /// the group does not exist (yet).
    pub fn find_security_group(&mut self) -> Result<Option<String>, AwsError> {
        let res: Result<types::DescribeSecurityGroups, AwsError> = self.call(
            "ec2",
            "describe-security-groups",
            vec!["--group-names".to_string(), SECURITY_GROUP_NAME.to_string()],
        );
        match res {
            Ok(resp) => Ok(resp.security_groups.first().map(|g| g.group_id.clone())),
            Err(err) if err.code() == Some(SECURITY_GROUP_NOT_FOUND) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Allows cockroach traffic on `port` from anywhere. An already existing
    /// rule is not an error.
    pub fn authorize_cockroach_ingress(
        &mut self,
        port: u16,
        security_group_id: &str,
    ) -> Result<(), AwsError> {
        let res = self.call_unit(
            "ec2",
            "authorize-security-group-ingress",
            vec![
                "--group-id".to_string(),
                security_group_id.to_string(),
                "--protocol".to_string(),
                COCKROACH_PROTOCOL.to_string(),
                "--port".to_string(),
                port.to_string(),
                "--cidr".to_string(),
                ALL_IP_ADDRESSES.to_string(),
            ],
        );
        match res {
            Err(err) if err.code() == Some(SECURITY_RULE_DUPLICATE) => {
                log::debug!("security group rule for port {} already present", port);
                Ok(())
            }
            other => other,
        }
    }
}
