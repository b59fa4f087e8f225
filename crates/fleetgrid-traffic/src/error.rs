use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The service lives in a different network than the router.
    #[error("service {service} is in network {service_network}, router is in {router_network}")]
    UnresolvedService {
        service: String,
        service_network: String,
        router_network: String,
    },

    #[error("invalid port {0}")]
    InvalidPort(u16),
}
