use async_trait::async_trait;
use thiserror::Error;

use mediation_core::MessageContext;

use crate::definition::EndpointDefinition;

/// Structured failure raised by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("transport fault (code={code:?}): {}", message.as_deref().unwrap_or("no message"))]
pub struct TransportFault {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub detail: Option<String>,
}

impl TransportFault {
    pub fn new<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
            detail: None,
        }
    }

    pub fn with_detail<S: Into<String>>(mut self, detail: S) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Outbound transport. Blocking mediators get their own instance so a slow
/// synchronous call never shares a channel with asynchronous traffic.
///
/// For non-blocking sends `Ok` means the request was handed off; the reply
/// comes back later through the response path.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: Option<&EndpointDefinition>,
        ctx: &mut MessageContext,
    ) -> Result<(), TransportFault>;
}
