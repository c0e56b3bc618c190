use async_trait::async_trait;
use warden_crypto::EncryptedMessageEnvelope;

use crate::error::TransportError;

/// Outbound message transport.
///
/// Submission is fire-and-forget: delivery guarantees belong to the
/// transport, and receivers must tolerate at-least-once delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn enqueue(&self, envelope: EncryptedMessageEnvelope) -> Result<(), TransportError>;
}
