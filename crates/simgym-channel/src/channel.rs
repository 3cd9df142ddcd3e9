//! Handshake-guarded channel abstraction
//!
//! A channel carries one message at a time in each direction. Every message
//! goes through exactly one handshake cycle:
//!
//! - sender: `send_begin` → `send_end(payload)`
//! - receiver: `recv_begin` → (payload) → `recv_end`
//!
//! The sender blocks in `send_begin` until the previous message in that
//! direction was released by `recv_end`; the receiver blocks in `recv_begin`
//! until a payload is published.

use async_trait::async_trait;
use simgym_core::{GymError, GymMessage, Result, deserialize, serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Default buffer capacity per direction, in bytes
pub const DEFAULT_CAPACITY: usize = 4096;

/// One endpoint of a fixed-capacity, handshake-guarded channel
#[async_trait]
pub trait SharedChannel: Send {
    /// Buffer capacity in bytes
    fn capacity(&self) -> usize;

    /// Acquire exclusive write access to the outgoing buffer
    async fn send_begin(&mut self) -> Result<()>;

    /// Publish `payload` and hand the buffer to the reader
    ///
    /// An oversized payload is rejected and the buffer returned unwritten.
    async fn send_end(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait for a published payload and return a copy of it
    ///
    /// A payload rejected here is released before returning, so no
    /// `recv_end` follows an error.
    async fn recv_begin(&mut self) -> Result<Vec<u8>>;

    /// Hand the incoming buffer back to the writer
    async fn recv_end(&mut self) -> Result<()>;
}

#[async_trait]
impl<C: SharedChannel + ?Sized> SharedChannel for Box<C> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    async fn send_begin(&mut self) -> Result<()> {
        (**self).send_begin().await
    }

    async fn send_end(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send_end(payload).await
    }

    async fn recv_begin(&mut self) -> Result<Vec<u8>> {
        (**self).recv_begin().await
    }

    async fn recv_end(&mut self) -> Result<()> {
        (**self).recv_end().await
    }
}

/// Fail with `PayloadTooLarge` unless `len` fits the channel
pub fn ensure_fits(len: usize, capacity: usize) -> Result<()> {
    if len > capacity {
        return Err(GymError::PayloadTooLarge { len, capacity });
    }
    Ok(())
}

/// Serialize `msg`, failing with `PayloadTooLarge` unless it fits `capacity`
pub fn encode_message(msg: &GymMessage, capacity: usize) -> Result<Vec<u8>> {
    let data = serialize(msg)?;
    ensure_fits(data.len(), capacity)?;
    Ok(data)
}

/// Serialize `msg` and run one send handshake
///
/// The size check happens before `send_begin`, so an oversized message never
/// touches the channel.
pub async fn send_message<C>(channel: &mut C, msg: &GymMessage, label: &str) -> Result<()>
where
    C: SharedChannel + ?Sized,
{
    let data = encode_message(msg, channel.capacity())?;
    send_payload(channel, &data, label).await
}

/// Run one send handshake for bytes from [`encode_message`]
pub async fn send_payload<C>(channel: &mut C, data: &[u8], label: &str) -> Result<()>
where
    C: SharedChannel + ?Sized,
{
    let json_preview: String = String::from_utf8_lossy(data).chars().take(200).collect();
    debug!("[{}] len={} json={}", label, data.len(), json_preview);

    channel.send_begin().await?;
    channel.send_end(data).await
}

/// Run one receive handshake and decode the payload
///
/// The buffer is released even when the payload does not decode.
pub async fn recv_message<C>(channel: &mut C, label: &str) -> Result<GymMessage>
where
    C: SharedChannel + ?Sized,
{
    let data = channel.recv_begin().await?;

    let json_preview: String = String::from_utf8_lossy(&data).chars().take(200).collect();
    debug!("[{}] len={} json={}", label, data.len(), json_preview);

    let decoded = deserialize(&data);
    channel.recv_end().await?;
    decoded.map_err(|e| GymError::ProtocolError(format!("Undecodable message: {}", e)))
}

/// Shared count of handshake primitives invoked on an endpoint
#[derive(Debug, Clone, Default)]
pub struct ActivityCounter(Arc<AtomicUsize>);

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primitives invoked so far
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Begin/end bookkeeping shared by the channel implementations
#[derive(Debug, Default)]
pub(crate) struct HandshakeState {
    sending: bool,
    receiving: bool,
}

impl HandshakeState {
    pub(crate) fn begin_send(&mut self) -> Result<()> {
        if self.sending {
            return Err(GymError::ProtocolError(
                "send_begin called twice without send_end".into(),
            ));
        }
        self.sending = true;
        Ok(())
    }

    pub(crate) fn end_send(&mut self) -> Result<()> {
        if !self.sending {
            return Err(GymError::ProtocolError(
                "send_end called without send_begin".into(),
            ));
        }
        self.sending = false;
        Ok(())
    }

    pub(crate) fn begin_recv(&mut self) -> Result<()> {
        if self.receiving {
            return Err(GymError::ProtocolError(
                "recv_begin called twice without recv_end".into(),
            ));
        }
        self.receiving = true;
        Ok(())
    }

    pub(crate) fn end_recv(&mut self) -> Result<()> {
        if !self.receiving {
            return Err(GymError::ProtocolError(
                "recv_end called without recv_begin".into(),
            ));
        }
        self.receiving = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_fits() {
        assert!(ensure_fits(4096, 4096).is_ok());
        assert!(matches!(
            ensure_fits(4097, 4096),
            Err(GymError::PayloadTooLarge {
                len: 4097,
                capacity: 4096
            })
        ));
    }

    #[test]
    fn test_encode_message_checks_capacity() {
        let data = encode_message(&GymMessage::stop(), DEFAULT_CAPACITY).unwrap();
        assert_eq!(deserialize(&data).unwrap(), GymMessage::stop());

        let err = encode_message(&GymMessage::stop(), 8).unwrap_err();
        assert!(matches!(err, GymError::PayloadTooLarge { capacity: 8, .. }));
    }

    #[test]
    fn test_handshake_order_enforced() {
        let mut state = HandshakeState::default();
        assert!(state.end_send().is_err());
        assert!(state.begin_send().is_ok());
        assert!(state.begin_send().is_err());
        assert!(state.end_send().is_ok());

        assert!(state.end_recv().is_err());
        assert!(state.begin_recv().is_ok());
        assert!(state.end_recv().is_ok());
    }
}
