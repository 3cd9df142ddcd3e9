//! POSIX shared-memory channel implementation
//!
//! Used when the simulation runs as a separate process. The segment is a
//! memory-mapped file with one slot per direction:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ controller→simulation: len u32 LE | pad | C  │
//! ├──────────────────────────────────────────────┤
//! │ simulation→controller: len u32 LE | pad | C  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Each slot is guarded by a pair of named semaphores (`empty`, `full`), the
//! same discipline as the in-process channel.

use crate::channel::{DEFAULT_CAPACITY, HandshakeState, SharedChannel, ensure_fits};
use async_trait::async_trait;
use memmap2::MmapMut;
use simgym_core::{GymError, Result};
use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Environment variable carrying the segment name to a spawned simulation
pub const SEGMENT_ENV: &str = "SIMGYM_SEGMENT";
/// Environment variable carrying the per-direction capacity
pub const CAPACITY_ENV: &str = "SIMGYM_CAPACITY";
/// Environment variable carrying the directory holding the segment file
pub const SHM_DIR_ENV: &str = "SIMGYM_SHM_DIR";

/// Longest accepted segment name (semaphore names derive from it)
pub const MAX_SEGMENT_NAME: usize = 24;

const SLOT_HEADER: usize = 8;

/// Directory used for segment files when none is configured
pub fn default_shm_dir() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if cfg!(target_os = "linux") && dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// POSIX named semaphore
struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: CString,
}

// sem_t handles are process-wide and the sem_* calls are thread-safe
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    fn create(name: &str, initial: u32) -> io::Result<Self> {
        let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // Leftover from a crashed session
        unsafe {
            libc::sem_unlink(name.as_ptr());
        }
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, name })
    }

    fn open(name: &str) -> io::Result<Self> {
        let name = CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { sem, name })
    }

    /// Blocks the calling thread
    fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.sem) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.sem) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn unlink(&self) {
        unsafe {
            libc::sem_unlink(self.name.as_ptr());
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Which end of the segment this process holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Creates the segment, writes actions
    Controller,
    /// Attaches to the segment, writes states
    Simulation,
}

/// One direction: its offset in the segment and its semaphore pair
struct Lane {
    offset: usize,
    empty: Arc<NamedSemaphore>,
    full: Arc<NamedSemaphore>,
}

impl Lane {
    fn names(segment: &str, lane: &str) -> (String, String) {
        (
            format!("/{}.{}.e", segment, lane),
            format!("/{}.{}.f", segment, lane),
        )
    }

    fn create(segment: &str, lane: &str, offset: usize) -> io::Result<Self> {
        let (empty, full) = Self::names(segment, lane);
        Ok(Self {
            offset,
            empty: Arc::new(NamedSemaphore::create(&empty, 1)?),
            full: Arc::new(NamedSemaphore::create(&full, 0)?),
        })
    }

    fn open(segment: &str, lane: &str, offset: usize) -> io::Result<Self> {
        let (empty, full) = Self::names(segment, lane);
        Ok(Self {
            offset,
            empty: Arc::new(NamedSemaphore::open(&empty)?),
            full: Arc::new(NamedSemaphore::open(&full)?),
        })
    }

    fn unlink(&self) {
        self.empty.unlink();
        self.full.unlink();
    }
}

/// Wait on a semaphore without stalling the runtime
async fn wait_on(sem: &Arc<NamedSemaphore>) -> Result<()> {
    let sem = Arc::clone(sem);
    tokio::task::spawn_blocking(move || sem.wait())
        .await
        .map_err(|e| GymError::IpcError(format!("Semaphore wait task failed: {}", e)))?
        .map_err(|e| GymError::IpcError(format!("Semaphore wait failed: {}", e)))
}

fn post(sem: &NamedSemaphore) -> Result<()> {
    sem.post()
        .map_err(|e| GymError::IpcError(format!("Semaphore post failed: {}", e)))
}

fn ipc_error(context: &str, err: io::Error) -> GymError {
    GymError::IpcError(format!("{}: {}", context, err))
}

/// Shared-memory endpoint
pub struct ShmChannel {
    segment: String,
    path: PathBuf,
    map: MmapMut,
    capacity: usize,
    tx: Lane,
    rx: Lane,
    owner: bool,
    handshake: HandshakeState,
}

impl ShmChannel {
    /// Create a fresh segment and its semaphores (controller side)
    ///
    /// The creator removes the segment file and unlinks the semaphores when
    /// dropped.
    pub fn create(segment: &str, capacity: usize, dir: &Path) -> Result<Self> {
        validate_segment(segment)?;
        let path = dir.join(segment);
        let size = segment_size(capacity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ipc_error("Failed to create segment", e))?;
        file.set_len(size as u64)
            .map_err(|e| ipc_error("Failed to size segment", e))?;
        // The file is only ever resized by its creator, before mapping
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ipc_error("Failed to map segment", e))?;

        let to_simulation = Lane::create(segment, "c2s", 0)
            .map_err(|e| ipc_error("Failed to create semaphores", e))?;
        let to_controller = Lane::create(segment, "s2c", SLOT_HEADER + capacity)
            .map_err(|e| ipc_error("Failed to create semaphores", e))?;

        debug!("Created segment {} at {:?} ({} bytes)", segment, path, size);
        Ok(Self {
            segment: segment.to_string(),
            path,
            map,
            capacity,
            tx: to_simulation,
            rx: to_controller,
            owner: true,
            handshake: HandshakeState::default(),
        })
    }

    /// Attach to an existing segment
    pub fn open(segment: &str, capacity: usize, dir: &Path, side: Side) -> Result<Self> {
        validate_segment(segment)?;
        let path = dir.join(segment);
        let size = segment_size(capacity);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ipc_error("Failed to open segment", e))?;
        let len = file
            .metadata()
            .map_err(|e| ipc_error("Failed to stat segment", e))?
            .len();
        if len < size as u64 {
            return Err(GymError::IpcError(format!(
                "Segment {} is {} bytes, capacity {} needs {}",
                segment, len, capacity, size
            )));
        }
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| ipc_error("Failed to map segment", e))?;

        let to_simulation = Lane::open(segment, "c2s", 0)
            .map_err(|e| ipc_error("Failed to open semaphores", e))?;
        let to_controller = Lane::open(segment, "s2c", SLOT_HEADER + capacity)
            .map_err(|e| ipc_error("Failed to open semaphores", e))?;
        let (tx, rx) = match side {
            Side::Controller => (to_simulation, to_controller),
            Side::Simulation => (to_controller, to_simulation),
        };

        Ok(Self {
            segment: segment.to_string(),
            path,
            map,
            capacity,
            tx,
            rx,
            owner: false,
            handshake: HandshakeState::default(),
        })
    }

    /// Attach as the simulation using the variables set by the supervisor
    pub fn from_env() -> Result<Self> {
        let segment = std::env::var(SEGMENT_ENV)
            .map_err(|_| GymError::IpcError(format!("{} is not set", SEGMENT_ENV)))?;
        let capacity = match std::env::var(CAPACITY_ENV) {
            Ok(value) => value.parse().map_err(|_| {
                GymError::IpcError(format!("Invalid {}: {}", CAPACITY_ENV, value))
            })?,
            Err(_) => DEFAULT_CAPACITY,
        };
        let dir = std::env::var_os(SHM_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_shm_dir);
        Self::open(&segment, capacity, &dir, Side::Simulation)
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn segment_size(capacity: usize) -> usize {
    2 * (SLOT_HEADER + capacity)
}

fn validate_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment.len() <= MAX_SEGMENT_NAME
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GymError::IpcError(format!(
            "Invalid segment name {:?} (1-{} chars of [A-Za-z0-9_-])",
            segment, MAX_SEGMENT_NAME
        )))
    }
}

#[async_trait]
impl SharedChannel for ShmChannel {
    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn send_begin(&mut self) -> Result<()> {
        wait_on(&self.tx.empty).await?;
        self.handshake.begin_send()
    }

    async fn send_end(&mut self, payload: &[u8]) -> Result<()> {
        self.handshake.end_send()?;
        if let Err(e) = ensure_fits(payload.len(), self.capacity) {
            // Hand the buffer back untouched
            post(&self.tx.empty)?;
            return Err(e);
        }

        let offset = self.tx.offset;
        let len = (payload.len() as u32).to_le_bytes();
        self.map[offset..offset + 4].copy_from_slice(&len);
        let start = offset + SLOT_HEADER;
        self.map[start..start + payload.len()].copy_from_slice(payload);

        post(&self.tx.full)
    }

    async fn recv_begin(&mut self) -> Result<Vec<u8>> {
        wait_on(&self.rx.full).await?;

        let offset = self.rx.offset;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.map[offset..offset + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > self.capacity {
            // Release the slot so the writer is not left waiting
            post(&self.rx.empty)?;
            return Err(GymError::ProtocolError(format!(
                "Published length {} exceeds capacity {}",
                len, self.capacity
            )));
        }
        self.handshake.begin_recv()?;

        let start = offset + SLOT_HEADER;
        Ok(self.map[start..start + len].to_vec())
    }

    async fn recv_end(&mut self) -> Result<()> {
        self.handshake.end_recv()?;
        post(&self.rx.empty)
    }
}

impl Drop for ShmChannel {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        self.tx.unlink();
        self.rx.unlink();
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove segment {:?}: {}", self.path, e);
        }
        debug!("Released segment {}", self.segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{recv_message, send_message};
    use simgym_core::GymMessage;

    #[test]
    fn test_segment_names() {
        assert!(validate_segment("simgym-42").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment(&"x".repeat(MAX_SEGMENT_NAME + 1)).is_err());
    }

    #[tokio::test]
    async fn test_exchange_between_sides() {
        let segment = format!("sgt-{}", std::process::id());
        let dir = std::env::temp_dir();

        let mut controller = ShmChannel::create(&segment, DEFAULT_CAPACITY, &dir).unwrap();
        let mut simulation =
            ShmChannel::open(&segment, DEFAULT_CAPACITY, &dir, Side::Simulation).unwrap();

        send_message(&mut controller, &GymMessage::stop(), "Bridge→Sim")
            .await
            .unwrap();
        let msg = recv_message(&mut simulation, "Bridge→Sim").await.unwrap();
        assert_eq!(msg, GymMessage::stop());

        let ack = GymMessage::SimInitAck {
            done: true,
            stop_sim_req: false,
        };
        send_message(&mut simulation, &ack, "Sim→Bridge").await.unwrap();
        let msg = recv_message(&mut controller, "Sim→Bridge").await.unwrap();
        assert_eq!(msg, ack);

        let path = controller.path().to_path_buf();
        drop(simulation);
        drop(controller);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_length_releases_slot() {
        let segment = format!("sgc-{}", std::process::id());
        let dir = std::env::temp_dir();

        let mut controller = ShmChannel::create(&segment, 64, &dir).unwrap();
        let mut simulation = ShmChannel::open(&segment, 64, &dir, Side::Simulation).unwrap();

        controller.send_begin().await.unwrap();
        controller.send_end(b"{}").await.unwrap();
        controller.map[0..4].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = simulation.recv_begin().await.unwrap_err();
        assert!(matches!(err, GymError::ProtocolError(_)));

        // Slot is free again and the next message goes through
        send_message(&mut controller, &GymMessage::stop(), "Bridge→Sim")
            .await
            .unwrap();
        let msg = recv_message(&mut simulation, "Bridge→Sim").await.unwrap();
        assert_eq!(msg, GymMessage::stop());
    }

    #[tokio::test]
    async fn test_oversized_send_end_returns_buffer() {
        let segment = format!("sgo-{}", std::process::id());
        let dir = std::env::temp_dir();

        let mut controller = ShmChannel::create(&segment, 4, &dir).unwrap();
        let mut simulation = ShmChannel::open(&segment, 4, &dir, Side::Simulation).unwrap();

        controller.send_begin().await.unwrap();
        let err = controller.send_end(b"too long").await.unwrap_err();
        assert!(matches!(err, GymError::PayloadTooLarge { len: 8, capacity: 4 }));

        controller.send_begin().await.unwrap();
        controller.send_end(b"ok").await.unwrap();
        assert_eq!(simulation.recv_begin().await.unwrap(), b"ok".to_vec());
        simulation.recv_end().await.unwrap();
    }
}
