//! Router binding: listener + target group in front of one service.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_core::Exposure;
use fleetgrid_state::{NetworkContext, ServiceSpec};

use crate::error::RouterError;

const DEFAULT_TARGET_PORT: u16 = 80;
const DEFAULT_HEALTH_CHECK_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
}

/// How targets are addressed. Tasks get their own network interface, so
/// they are registered by IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Ip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroupSpec {
    pub port: u16,
    pub protocol: Protocol,
    pub target_type: TargetType,
    pub health_check_path: String,
}

/// A load balancer bound to exactly one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficRouter {
    pub name: String,
    pub service_id: String,
    pub network_id: String,
    pub exposure: Exposure,
    pub listener: Listener,
    pub target_group: TargetGroupSpec,
}

/// Bind a router in `network` to `service`.
///
/// Fails with [`RouterError::UnresolvedService`] when the service's tasks
/// are placed in another network.
pub fn bind(
    service: &ServiceSpec,
    network: &NetworkContext,
    listener_port: u16,
    exposure: Exposure,
) -> Result<TrafficRouter, RouterError> {
    if service.network_id != network.id {
        warn!(
            service = %service.id,
            service_network = %service.network_id,
            router_network = %network.id,
            "router cannot reach service"
        );
        return Err(RouterError::UnresolvedService {
            service: service.id.clone(),
            service_network: service.network_id.clone(),
            router_network: network.id.clone(),
        });
    }
    if listener_port == 0 {
        return Err(RouterError::InvalidPort(listener_port));
    }

    let router = TrafficRouter {
        name: format!("{}-lb", service.name),
        service_id: service.id.clone(),
        network_id: network.id.clone(),
        exposure,
        listener: Listener {
            port: listener_port,
            protocol: Protocol::Http,
        },
        target_group: TargetGroupSpec {
            port: DEFAULT_TARGET_PORT,
            protocol: Protocol::Http,
            target_type: TargetType::Ip,
            health_check_path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
        },
    };

    debug!(
        router = %router.name,
        service = %service.id,
        port = listener_port,
        ?exposure,
        "router bound"
    );
    Ok(router)
}

impl TrafficRouter {
    pub fn with_target_port(mut self, port: u16) -> Result<Self, RouterError> {
        if port == 0 {
            return Err(RouterError::InvalidPort(port));
        }
        self.target_group.port = port;
        Ok(self)
    }

    pub fn with_health_check_path(mut self, path: &str) -> Self {
        self.target_group.health_check_path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self
    }

    /// DNS name the load balancer answers on.
    ///
    /// Derived from the router name and its resource id, so the same
    /// topology always yields the same name. Private routers get the
    /// `internal-` prefix.
    pub fn dns_name(&self, resource_id: &str, region: &str) -> String {
        let suffix = resource_id
            .rsplit('-')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(resource_id);
        let host = format!("{}-{}.{}.elb.amazonaws.com", self.name, suffix, region);
        match self.exposure {
            Exposure::Public => host,
            Exposure::Private => format!("internal-{host}"),
        }
    }
}
