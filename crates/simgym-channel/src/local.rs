//! In-process channel implementation
//!
//! Both endpoints live in one address space. Each direction is a slot guarded
//! by a semaphore pair: `empty` (starts at 1) is taken by the writer and
//! returned by the reader, `full` (starts at 0) is returned by the writer and
//! taken by the reader. The payload itself sits in the slot until the reader
//! takes it, so a message published right before the writer went away is
//! still delivered. Used by tests and by simulations that run as a task next
//! to the controller.

use crate::channel::{ActivityCounter, HandshakeState, SharedChannel, ensure_fits};
use async_trait::async_trait;
use simgym_core::{GymError, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// One direction of a local channel
#[derive(Debug)]
struct Slot {
    empty: Semaphore,
    full: Semaphore,
    /// Published and not yet read
    payload: Mutex<Option<Vec<u8>>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            empty: Semaphore::new(1),
            full: Semaphore::new(0),
            payload: Mutex::new(None),
        }
    }

    fn take_payload(&self) -> Result<Option<Vec<u8>>> {
        let mut slot = self
            .payload
            .lock()
            .map_err(|_| GymError::IpcError("Channel slot poisoned".into()))?;
        Ok(slot.take())
    }

    fn close(&self) {
        self.empty.close();
        self.full.close();
    }
}

/// Constructor for connected endpoint pairs
pub struct LocalChannel;

impl LocalChannel {
    /// Create two connected endpoints: `(controller, simulation)`
    pub fn pair(capacity: usize) -> (LocalEndpoint, LocalEndpoint) {
        let to_simulation = Arc::new(Slot::new());
        let to_controller = Arc::new(Slot::new());

        let controller = LocalEndpoint {
            tx: Arc::clone(&to_simulation),
            rx: Arc::clone(&to_controller),
            capacity,
            handshake: HandshakeState::default(),
            activity: ActivityCounter::new(),
        };
        let simulation = LocalEndpoint {
            tx: to_controller,
            rx: to_simulation,
            capacity,
            handshake: HandshakeState::default(),
            activity: ActivityCounter::new(),
        };
        (controller, simulation)
    }
}

/// One side of a [`LocalChannel`]
///
/// Dropping an endpoint closes both directions, so a peer blocked in a
/// handshake fails instead of waiting forever once nothing is left to read.
#[derive(Debug)]
pub struct LocalEndpoint {
    tx: Arc<Slot>,
    rx: Arc<Slot>,
    capacity: usize,
    handshake: HandshakeState,
    activity: ActivityCounter,
}

impl LocalEndpoint {
    /// Counter of handshake primitives invoked on this endpoint
    pub fn activity(&self) -> ActivityCounter {
        self.activity.clone()
    }

    /// Report activity into an existing counter instead
    pub fn with_activity(mut self, activity: ActivityCounter) -> Self {
        self.activity = activity;
        self
    }
}

fn peer_gone() -> GymError {
    GymError::IpcError("Peer endpoint closed".into())
}

#[async_trait]
impl SharedChannel for LocalEndpoint {
    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn send_begin(&mut self) -> Result<()> {
        self.activity.bump();
        self.tx
            .empty
            .acquire()
            .await
            .map_err(|_| peer_gone())?
            .forget();
        self.handshake.begin_send()
    }

    async fn send_end(&mut self, payload: &[u8]) -> Result<()> {
        self.activity.bump();
        self.handshake.end_send()?;
        if let Err(e) = ensure_fits(payload.len(), self.capacity) {
            // Hand the buffer back untouched
            self.tx.empty.add_permits(1);
            return Err(e);
        }
        {
            let mut slot = self
                .tx
                .payload
                .lock()
                .map_err(|_| GymError::IpcError("Channel slot poisoned".into()))?;
            *slot = Some(payload.to_vec());
        }
        self.tx.full.add_permits(1);
        Ok(())
    }

    async fn recv_begin(&mut self) -> Result<Vec<u8>> {
        self.activity.bump();
        match self.rx.full.acquire().await {
            Ok(permit) => permit.forget(),
            // A closed slot may still hold the peer's last message
            Err(_) => match self.rx.take_payload()? {
                Some(payload) => {
                    self.handshake.begin_recv()?;
                    return Ok(payload);
                }
                None => return Err(peer_gone()),
            },
        }
        self.handshake.begin_recv()?;
        self.rx.take_payload()?.ok_or_else(|| {
            GymError::ProtocolError("Slot signalled full without a payload".into())
        })
    }

    async fn recv_end(&mut self) -> Result<()> {
        self.activity.bump();
        self.handshake.end_recv()?;
        self.rx.empty.add_permits(1);
        Ok(())
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        self.tx.close();
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DEFAULT_CAPACITY, recv_message, send_message};
    use simgym_core::GymMessage;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let (mut controller, mut simulation) = LocalChannel::pair(DEFAULT_CAPACITY);

        let sim = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let payload = simulation.recv_begin().await.unwrap();
                simulation.recv_end().await.unwrap();
                seen.push(payload);
            }
            seen
        });

        for byte in [1u8, 2, 3] {
            assert_ok!(controller.send_begin().await);
            assert_ok!(controller.send_end(&[byte]).await);
        }

        let seen = sim.await.unwrap();
        assert_eq!(seen, vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn test_request_response_cycle() {
        let (mut controller, mut simulation) = LocalChannel::pair(DEFAULT_CAPACITY);

        let sim = tokio::spawn(async move {
            let msg = recv_message(&mut simulation, "Bridge→Sim").await.unwrap();
            assert_eq!(msg.type_name(), "EnvAct");
            let reply = GymMessage::SimInitAck {
                done: true,
                stop_sim_req: false,
            };
            send_message(&mut simulation, &reply, "Sim→Bridge").await.unwrap();
        });

        assert_ok!(send_message(&mut controller, &GymMessage::stop(), "Bridge→Sim").await);
        let reply = assert_ok!(recv_message(&mut controller, "Sim→Bridge").await);
        assert_eq!(reply.type_name(), "SimInitAck");
        sim.await.unwrap();

        // send: begin+end, recv: begin+end
        assert_eq!(controller.activity().get(), 4);
    }

    #[tokio::test]
    async fn test_oversized_message_never_starts_handshake() {
        let (mut controller, _simulation) = LocalChannel::pair(16);

        let err = assert_err!(send_message(&mut controller, &GymMessage::stop(), "Bridge→Sim").await);
        assert!(matches!(err, GymError::PayloadTooLarge { capacity: 16, .. }));
        assert_eq!(controller.activity().get(), 0);
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_blocked_receive() {
        let (mut controller, simulation) = LocalChannel::pair(DEFAULT_CAPACITY);

        let waiter = tokio::spawn(async move { controller.recv_begin().await });
        tokio::task::yield_now().await;
        drop(simulation);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(GymError::IpcError(_))));
    }

    #[tokio::test]
    async fn test_last_message_survives_sender_drop() {
        let (mut controller, mut simulation) = LocalChannel::pair(DEFAULT_CAPACITY);

        assert_ok!(simulation.send_begin().await);
        assert_ok!(simulation.send_end(b"final").await);
        drop(simulation);

        let payload = assert_ok!(controller.recv_begin().await);
        assert_eq!(payload, b"final".to_vec());
        assert_ok!(controller.recv_end().await);

        // Nothing left after the last message
        let err = assert_err!(controller.recv_begin().await);
        assert!(matches!(err, GymError::IpcError(_)));
    }

    #[tokio::test]
    async fn test_oversized_send_end_returns_buffer() {
        let (mut controller, mut simulation) = LocalChannel::pair(4);

        assert_ok!(controller.send_begin().await);
        let err = assert_err!(controller.send_end(b"too long").await);
        assert!(matches!(err, GymError::PayloadTooLarge { len: 8, capacity: 4 }));

        // The writer can start over and the reader sees only the retry
        let begin = tokio::time::timeout(Duration::from_millis(100), controller.send_begin()).await;
        assert!(matches!(begin, Ok(Ok(()))));
        assert_ok!(controller.send_end(b"ok").await);
        let payload = assert_ok!(simulation.recv_begin().await);
        assert_eq!(payload, b"ok".to_vec());
    }

    #[tokio::test]
    async fn test_send_end_without_begin() {
        let (mut controller, _simulation) = LocalChannel::pair(DEFAULT_CAPACITY);
        let err = assert_err!(controller.send_end(b"{}").await);
        assert!(matches!(err, GymError::ProtocolError(_)));
    }
}
