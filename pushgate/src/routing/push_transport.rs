//! Send contract consumed by the push distributor.

use crate::data_plane::connector::UdpConnector;
use crate::data_plane::{SendFilter, SendOptions, TransportError};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Delivers `message` on `route` to `targets`, or to every connection when `None`.
    ///
    /// Reports only whether the transport operation succeeded.
    async fn send(
        &self,
        filter: Option<&SendFilter>,
        route: &str,
        message: &Value,
        targets: Option<&[u64]>,
        options: SendOptions,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl PushTransport for UdpConnector {
    async fn send(
        &self,
        filter: Option<&SendFilter>,
        route: &str,
        message: &Value,
        targets: Option<&[u64]>,
        options: SendOptions,
    ) -> Result<(), TransportError> {
        UdpConnector::send(self, filter, route, message, targets, options).await
    }
}
