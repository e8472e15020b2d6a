// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use log;

use super::cli::AwsCli;
use super::AwsError;
use crate::runner::ToolRunner;

/// Name of the cluster load balancer.
pub const COCKROACH_ELB_NAME: &str = "cockroach-db";
const ELB_NOT_FOUND: &str = "LoadBalancerNotFound";
const ELB_PROTOCOL: &str = "TCP";

// AWS defaults are 30s interval and 10 healthy checks, which makes a new
// node wait minutes before it receives traffic.
const HEALTH_CHECK_INTERVAL_SECS: u32 = 5;
const HEALTH_CHECK_TIMEOUT_SECS: u32 = 2;
const HEALTH_CHECK_HEALTHY_THRESHOLD: u32 = 2;
const HEALTH_CHECK_UNHEALTHY_THRESHOLD: u32 = 2;

mod types {
    #[derive(serde::Deserialize, Debug)]
    pub struct LoadBalancerDescription {
        #[serde(rename = "DNSName")]
        pub dns_name: String,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct DescribeLoadBalancers {
        #[serde(rename = "LoadBalancerDescriptions", default)]
        pub descriptions: Vec<LoadBalancerDescription>,
    }

    #[derive(serde::Deserialize, Debug)]
    pub struct CreateLoadBalancer {
        #[serde(rename = "DNSName")]
        pub dns_name: String,
    }
}

impl<R> AwsCli<R>
where
    R: ToolRunner,
{
    /// Looks for the cockroach load balancer and returns its DNS name. Returns
    /// None if the load balancer does not exist.
    pub fn find_load_balancer(&mut self) -> Result<Option<String>, AwsError> {
        let res: Result<types::DescribeLoadBalancers, AwsError> = self.call(
            "elb",
            "describe-load-balancers",
            vec![
                "--load-balancer-names".to_string(),
                COCKROACH_ELB_NAME.to_string(),
            ],
        );
        let resp = match res {
            Ok(resp) => resp,
            Err(err) if err.code() == Some(ELB_NOT_FOUND) => return Ok(None),
            Err(err) => return Err(err),
        };

        match resp.descriptions.len() {
            0 => Ok(None),
            1 => Ok(Some(resp.descriptions[0].dns_name.clone())),
            n => Err(AwsError::Ambiguous(format!(
                "found {} ELBs named {}",
                n, COCKROACH_ELB_NAME
            ))),
        }
    }

    /// Creates the cockroach load balancer in a single zone and returns its
    /// DNS name.
    pub fn create_load_balancer(
        &mut self,
        port: u16,
        zone: &str,
        security_group_id: &str,
    ) -> Result<String, AwsError> {
        let listener = format!(
            "Protocol={},LoadBalancerPort={},InstanceProtocol={},InstancePort={}",
            ELB_PROTOCOL, port, ELB_PROTOCOL, port
        );
        let availability_zone = format!("{}{}", self.region(), zone);
        let resp: types::CreateLoadBalancer = self.call(
            "elb",
            "create-load-balancer",
            vec![
                "--load-balancer-name".to_string(),
                COCKROACH_ELB_NAME.to_string(),
                "--listeners".to_string(),
                listener,
                "--availability-zones".to_string(),
                availability_zone,
                "--security-groups".to_string(),
                security_group_id.to_string(),
            ],
        )?;
        Ok(resp.dns_name)
    }

    /// Replaces the default health check, which cannot be set at creation
    /// time.
    pub fn configure_health_check(&mut self, port: u16) -> Result<(), AwsError> {
        let check = format!(
            "Target={}:{},Interval={},Timeout={},UnhealthyThreshold={},HealthyThreshold={}",
            ELB_PROTOCOL,
            port,
            HEALTH_CHECK_INTERVAL_SECS,
            HEALTH_CHECK_TIMEOUT_SECS,
            HEALTH_CHECK_UNHEALTHY_THRESHOLD,
            HEALTH_CHECK_HEALTHY_THRESHOLD
        );
        self.call_unit(
            "elb",
            "configure-health-check",
            vec![
                "--load-balancer-name".to_string(),
                COCKROACH_ELB_NAME.to_string(),
                "--health-check".to_string(),
                check,
            ],
        )
    }

    /// Looks for the cockroach load balancer and creates it if it does not
    /// exist. The health check is applied either way, so that a run which
    /// failed after creating the load balancer is completed by the next one.
    /// Returns its DNS name.
    pub fn find_or_create_load_balancer(
        &mut self,
        port: u16,
        zone: &str,
        security_group_id: &str,
    ) -> Result<String, AwsError> {
        log::info!("looking for load balancer");
        let dns_name = match self.find_load_balancer()? {
            Some(dns_name) => {
                log::info!("found load balancer {}", dns_name);
                dns_name
            }
            None => {
                log::info!("no existing load balancer, creating one");
                let dns_name = self.create_load_balancer(port, zone, security_group_id)?;
                log::info!("created load balancer {}", dns_name);
                dns_name
            }
        };
        self.configure_health_check(port)?;
        Ok(dns_name)
    }

    /// Adds an instance to the cockroach load balancer, which must exist.
    pub fn register_instance(&mut self, instance_id: &str) -> Result<(), AwsError> {
        self.call_unit(
            "elb",
            "register-instances-with-load-balancer",
            vec![
                "--load-balancer-name".to_string(),
                COCKROACH_ELB_NAME.to_string(),
                "--instances".to_string(),
                instance_id.to_string(),
            ],
        )
    }

    /// Removes an instance from the cockroach load balancer, which must exist.
    pub fn deregister_instance(&mut self, instance_id: &str) -> Result<(), AwsError> {
        self.call_unit(
            "elb",
            "deregister-instances-from-load-balancer",
            vec![
                "--load-balancer-name".to_string(),
                COCKROACH_ELB_NAME.to_string(),
                "--instances".to_string(),
                instance_id.to_string(),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::mock::{failed, ok, MockRunner};

    const DESCRIBE_ONE: &str = r#"{"LoadBalancerDescriptions": [{"LoadBalancerName": "cockroach-db", "DNSName": "cockroach-db-1234.us-east-1.elb.amazonaws.com"}]}"#;
    const NOT_FOUND: &str = "An error occurred (LoadBalancerNotFound) when calling the DescribeLoadBalancers operation: There is no ACTIVE Load Balancer named 'cockroach-db'";

    fn aws_args(args: &[&str]) -> Vec<String> {
        let mut call = vec!["aws", "--region", "us-east-1", "--output", "json"];
        call.extend_from_slice(args);
        call.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_find_load_balancer() {
        let r = MockRunner::new(vec![ok(DESCRIBE_ONE), failed("aws", NOT_FOUND)]);
        let mut aws = AwsCli::new(r, "us-east-1");
        assert_eq!(
            aws.find_load_balancer().unwrap(),
            Some("cockroach-db-1234.us-east-1.elb.amazonaws.com".to_string())
        );
        assert_eq!(aws.find_load_balancer().unwrap(), None);
    }

    #[test]
    fn test_find_or_create_existing() {
        let r = MockRunner::new(vec![ok(DESCRIBE_ONE), ok("")]);
        let calls = r.calls();
        let mut aws = AwsCli::new(r, "us-east-1");
        assert_eq!(
            aws.find_or_create_load_balancer(8080, "a", "sg-1").unwrap(),
            "cockroach-db-1234.us-east-1.elb.amazonaws.com"
        );
        let calls = calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains(&"configure-health-check".to_string()));
    }

    #[test]
    fn test_rerun_configures_health_check() {
        let r = MockRunner::new(vec![
            failed("aws", NOT_FOUND),
            ok(r#"{"DNSName": "cockroach-db-99.us-east-1.elb.amazonaws.com"}"#),
            failed(
                "aws",
                "An error occurred (Throttling) when calling the ConfigureHealthCheck operation: Rate exceeded",
            ),
            ok(r#"{"LoadBalancerDescriptions": [{"DNSName": "cockroach-db-99.us-east-1.elb.amazonaws.com"}]}"#),
            ok(""),
        ]);
        let calls = r.calls();
        let mut aws = AwsCli::new(r, "us-east-1");
        let err = aws
            .find_or_create_load_balancer(8080, "a", "sg-1")
            .unwrap_err();
        assert_eq!(err.code(), Some("Throttling"));

        assert_eq!(
            aws.find_or_create_load_balancer(8080, "a", "sg-1").unwrap(),
            "cockroach-db-99.us-east-1.elb.amazonaws.com"
        );
        let calls = calls.borrow();
        let count = |op: &str| calls.iter().filter(|c| c.contains(&op.to_string())).count();
        assert_eq!(count("create-load-balancer"), 1);
        assert_eq!(count("configure-health-check"), 2);
    }

    #[test]
    fn test_find_or_create_new() {
        let r = MockRunner::new(vec![
            failed("aws", NOT_FOUND),
            ok(r#"{"DNSName": "cockroach-db-99.us-east-1.elb.amazonaws.com"}"#),
            ok(""),
        ]);
        let calls = r.calls();
        let mut aws = AwsCli::new(r, "us-east-1");
        assert_eq!(
            aws.find_or_create_load_balancer(8080, "a", "sg-1").unwrap(),
            "cockroach-db-99.us-east-1.elb.amazonaws.com"
        );

        let mut calls = calls.borrow_mut();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls.pop_front().unwrap(),
            aws_args(&[
                "elb",
                "describe-load-balancers",
                "--load-balancer-names",
                "cockroach-db"
            ])
        );
        assert_eq!(
            calls.pop_front().unwrap(),
            aws_args(&[
                "elb",
                "create-load-balancer",
                "--load-balancer-name",
                "cockroach-db",
                "--listeners",
                "Protocol=TCP,LoadBalancerPort=8080,InstanceProtocol=TCP,InstancePort=8080",
                "--availability-zones",
                "us-east-1a",
                "--security-groups",
                "sg-1"
            ])
        );
        assert_eq!(
            calls.pop_front().unwrap(),
            aws_args(&[
                "elb",
                "configure-health-check",
                "--load-balancer-name",
                "cockroach-db",
                "--health-check",
                "Target=TCP:8080,Interval=5,Timeout=2,UnhealthyThreshold=2,HealthyThreshold=2"
            ])
        );
    }

    #[test]
    fn test_find_or_create_twice_is_idempotent() {
        let r = MockRunner::new(vec![
            failed("aws", NOT_FOUND),
            ok(r#"{"DNSName": "cockroach-db-99.us-east-1.elb.amazonaws.com"}"#),
            ok(""),
            ok(r#"{"LoadBalancerDescriptions": [{"DNSName": "cockroach-db-99.us-east-1.elb.amazonaws.com"}]}"#),
            ok(""),
        ]);
        let calls = r.calls();
        let mut aws = AwsCli::new(r, "us-east-1");
        let first = aws.find_or_create_load_balancer(8080, "a", "sg-1").unwrap();
        let second = aws.find_or_create_load_balancer(8080, "a", "sg-1").unwrap();
        assert_eq!(first, second);

        let creates = calls
            .borrow()
            .iter()
            .filter(|c| c.contains(&"create-load-balancer".to_string()))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_register_deregister() {
        let r = MockRunner::new(vec![ok("{}"), ok("{}")]);
        let calls = r.calls();
        let mut aws = AwsCli::new(r, "us-east-1");
        aws.register_instance("i-1").unwrap();
        aws.deregister_instance("i-1").unwrap();

        let mut calls = calls.borrow_mut();
        assert_eq!(
            calls.pop_front().unwrap(),
            aws_args(&[
                "elb",
                "register-instances-with-load-balancer",
                "--load-balancer-name",
                "cockroach-db",
                "--instances",
                "i-1"
            ])
        );
        assert_eq!(
            calls.pop_front().unwrap(),
            aws_args(&[
                "elb",
                "deregister-instances-from-load-balancer",
                "--load-balancer-name",
                "cockroach-db",
                "--instances",
                "i-1"
            ])
        );
    }
}
