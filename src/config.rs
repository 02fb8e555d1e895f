/*! Settings the host hands to the [`Gateway`](crate::gateway::Gateway).
*/

use std::time::Duration;

use crate::address::BackendAddress;

/// Backend used when no override is given for a request
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9010;
/// `SERVER_HANDLER` value that selects this gateway
pub const HANDLER_NAME: &str = "fastcgi";
/// Value of the `X-Powered-By` marker header
pub const POWERED_BY: &str = concat!("fcgi-gateway/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GatewayConfig {
    default_address: BackendAddress,
    handler_name: String,
    powered_by: String,
    dispatch_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> GatewayConfig {
        GatewayConfig {
            default_address: BackendAddress::new(DEFAULT_HOST, DEFAULT_PORT),
            handler_name: HANDLER_NAME.to_owned(),
            powered_by: POWERED_BY.to_owned(),
            dispatch_timeout: None,
        }
    }
}

impl GatewayConfig {
    pub fn with_default_address(mut self, addr: BackendAddress) -> GatewayConfig {
        self.default_address = addr;
        self
    }
    pub fn with_handler_name<S: Into<String>>(mut self, name: S) -> GatewayConfig {
        self.handler_name = name.into();
        self
    }
    pub fn with_powered_by<S: Into<String>>(mut self, marker: S) -> GatewayConfig {
        self.powered_by = marker.into();
        self
    }
    /// Give up on a backend that has not answered after `after`.
    /// Without a deadline a hung backend blocks the request indefinitely.
    pub fn with_dispatch_timeout(mut self, after: Duration) -> GatewayConfig {
        self.dispatch_timeout = Some(after);
        self
    }
    pub fn default_address(&self) -> &BackendAddress {
        &self.default_address
    }
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }
    pub fn powered_by(&self) -> &str {
        &self.powered_by
    }
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout
    }
}
