// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Cluster wide resources. Load balancing is the HTTP flavor: a global
//! forwarding rule targets a proxy, which uses a URL map, which sends
//! everything to a backend service made of the cockroach instance group.

use log;
use serde::Serialize;

use super::compute::{Compute, ComputeApi};
use super::operation::Operation;
use super::GceError;

pub const FIREWALL_RULE_NAME: &str = "cockroach-firewall";
pub const HEALTH_CHECK_NAME: &str = "cockroach-health-check";
pub const BACKEND_SERVICE_NAME: &str = "cockroach-backend";
pub const URL_MAP_NAME: &str = "cockroach-url-map";
pub const HTTP_PROXY_NAME: &str = "cockroach-proxy";
pub const FORWARDING_RULE_NAME: &str = "cockroach-forward-rule";

const COCKROACH_PROTOCOL: &str = "tcp";
const ALL_IP_ADDRESSES: &str = "0.0.0.0/0";
const HEALTH_CHECK_PATH: &str = "/_status/";
/// Named port of the instance group the backend service sends traffic to.
pub const BACKEND_PORT_NAME: &str = "http";

/// Any resource, only its link is needed.
#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub self_link: String,
}

/// Only the address of the forwarding rule is needed.
#[derive(serde::Deserialize, Debug)]
pub struct ForwardingRule {
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
}

mod types {
    use serde::Serialize;

    #[derive(Serialize)]
    pub struct FirewallAllowed<'a> {
        #[serde(rename = "IPProtocol")]
        pub ip_protocol: &'a str,
        pub ports: Vec<String>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Firewall<'a> {
        pub name: &'a str,
        pub allowed: Vec<FirewallAllowed<'a>>,
        pub source_ranges: Vec<&'a str>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HttpHealthCheck<'a> {
        pub name: &'a str,
        pub port: u16,
        pub request_path: &'a str,
        pub check_interval_sec: u32,
        pub timeout_sec: u32,
        pub healthy_threshold: u32,
        pub unhealthy_threshold: u32,
    }

    #[derive(Serialize)]
    pub struct Backend<'a> {
        pub group: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BackendService<'a> {
        pub name: &'a str,
        pub health_checks: Vec<&'a str>,
        pub backends: Vec<Backend<'a>>,
        pub port_name: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct UrlMap<'a> {
        pub name: &'a str,
        pub default_service: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TargetHttpProxy<'a> {
        pub name: &'a str,
        pub url_map: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ForwardingRule<'a> {
        pub name: &'a str,
        #[serde(rename = "IPProtocol")]
        pub ip_protocol: &'a str,
        pub port_range: String,
        pub target: &'a str,
    }
}

impl<A> Compute<A>
where
    A: ComputeApi,
{
    /// Returns the link of the resource at `collection/name`, inserting
    /// `body` into `collection` and waiting for the insert to finish if the
    /// resource does not exist. Only a not found lookup leads to an insert.
    pub fn find_or_create<B: Serialize>(
        &mut self,
        kind: &str,
        collection: &str,
        name: &str,
        body: &B,
    ) -> Result<String, GceError> {
        let path = format!("{}/{}", collection, name);
        if let Some(found) = self.find::<Resource>(&path)? {
            log::info!("found {} {}: {}", kind, name, found.self_link);
            return Ok(found.self_link);
        }

        let op: Operation = self.post(collection, body)?;
        let op = self.wait_for_operation(op)?;
        log::info!("created {} {}: {}", kind, name, op.target_link);
        Ok(op.target_link)
    }

    pub fn ensure_firewall_rule(&mut self, port: u16) -> Result<String, GceError> {
        let collection = self.global_path("firewalls");
        self.find_or_create(
            "firewall rule",
            &collection,
            FIREWALL_RULE_NAME,
            &types::Firewall {
                name: FIREWALL_RULE_NAME,
                allowed: vec![types::FirewallAllowed {
                    ip_protocol: COCKROACH_PROTOCOL,
                    ports: vec![port.to_string()],
                }],
                source_ranges: vec![ALL_IP_ADDRESSES],
            },
        )
    }

    pub fn ensure_health_check(&mut self, port: u16) -> Result<String, GceError> {
        let collection = self.global_path("httpHealthChecks");
        self.find_or_create(
            "health check",
            &collection,
            HEALTH_CHECK_NAME,
            &types::HttpHealthCheck {
                name: HEALTH_CHECK_NAME,
                port,
                request_path: HEALTH_CHECK_PATH,
                check_interval_sec: 2,
                timeout_sec: 1,
                healthy_threshold: 2,
                unhealthy_threshold: 2,
            },
        )
    }

    pub fn ensure_backend_service(
        &mut self,
        health_check: &str,
        instance_group: &str,
    ) -> Result<String, GceError> {
        let collection = self.global_path("backendServices");
        self.find_or_create(
            "backend service",
            &collection,
            BACKEND_SERVICE_NAME,
            &types::BackendService {
                name: BACKEND_SERVICE_NAME,
                health_checks: vec![health_check],
                backends: vec![types::Backend {
                    group: instance_group,
                }],
                port_name: BACKEND_PORT_NAME,
            },
        )
    }

    pub fn ensure_url_map(&mut self, backend_service: &str) -> Result<String, GceError> {
        let collection = self.global_path("urlMaps");
        self.find_or_create(
            "URL map",
            &collection,
            URL_MAP_NAME,
            &types::UrlMap {
                name: URL_MAP_NAME,
                default_service: backend_service,
            },
        )
    }

    pub fn ensure_http_proxy(&mut self, url_map: &str) -> Result<String, GceError> {
        let collection = self.global_path("targetHttpProxies");
        self.find_or_create(
            "HTTP proxy",
            &collection,
            HTTP_PROXY_NAME,
            &types::TargetHttpProxy {
                name: HTTP_PROXY_NAME,
                url_map,
            },
        )
    }

    pub fn ensure_forwarding_rule(&mut self, port: u16, proxy: &str) -> Result<String, GceError> {
        let collection = self.global_path("forwardingRules");
        self.find_or_create(
            "forwarding rule",
            &collection,
            FORWARDING_RULE_NAME,
            &types::ForwardingRule {
                name: FORWARDING_RULE_NAME,
                ip_protocol: "TCP",
                port_range: port.to_string(),
                target: proxy,
            },
        )
    }

    /// The global forwarding rule, whose address is the cluster entry point.
    pub fn find_forwarding_rule(&mut self) -> Result<Option<ForwardingRule>, GceError> {
        let path = self.global_path(&format!("forwardingRules/{}", FORWARDING_RULE_NAME));
        self.find(&path)
    }

    /// Sets up the firewall and the load balancing chain. Each step feeds
    /// its link to the next one, the first failure stops the chain.
    pub fn ensure_load_balancer(&mut self, port: u16) -> Result<String, GceError> {
        self.ensure_firewall_rule(port)?;

        let group = self.ensure_instance_group(port)?;
        let health_check = self.ensure_health_check(port)?;
        let backend = self.ensure_backend_service(&health_check, &group)?;
        let url_map = self.ensure_url_map(&backend)?;
        let proxy = self.ensure_http_proxy(&url_map)?;
        self.ensure_forwarding_rule(port, &proxy)
    }
}
