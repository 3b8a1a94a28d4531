//! Shared receive buffer between a transport reader and the master
//!
//! The transport's reader task appends bytes as they arrive; the master
//! consumes them from the front through the frame assembler. The buffer also
//! carries the link-level counters (resync discards, link restarts) that the
//! communication statistics report.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use crate::constants::MAX_RTU_FRAME_SIZE;
use crate::frame::{try_extract_frame, Extraction};

#[derive(Debug, Default)]
struct RxState {
    bytes: BytesMut,
    discarded_bytes: u64,
    restarts: u64,
}

/// Cloneable handle to an append-only receive buffer.
#[derive(Debug, Clone, Default)]
pub struct RxBuffer {
    inner: Arc<Mutex<RxState>>,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RxState {
                bytes: BytesMut::with_capacity(MAX_RTU_FRAME_SIZE),
                ..RxState::default()
            })),
        }
    }

    /// Append bytes received from the link.
    pub fn append(&self, data: &[u8]) {
        self.inner.lock().bytes.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().bytes.is_empty()
    }

    /// Copy of the buffered bytes, for diagnostics.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().bytes.to_vec()
    }

    /// Drop the head byte, counting it as a resync discard.
    pub fn discard_one_byte(&self) -> Option<u8> {
        let mut state = self.inner.lock();
        if state.bytes.is_empty() {
            return None;
        }
        let byte = state.bytes.get_u8();
        state.discarded_bytes += 1;
        debug!("Discarding byte from receive buffer: {:02x}", byte);
        Some(byte)
    }

    /// Drop everything buffered, returning how many bytes were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        let dropped = state.bytes.len();
        state.bytes.clear();
        dropped
    }

    /// Run the frame assembler against the buffer head.
    ///
    /// A resync byte dropped by the assembler is counted like
    /// [`discard_one_byte`](Self::discard_one_byte).
    pub fn extract_frame(&self, expected_address: u8) -> Extraction {
        let mut state = self.inner.lock();
        let extraction = try_extract_frame(&mut state.bytes, expected_address);
        if let Extraction::FramingError { discarded, .. } = &extraction {
            state.discarded_bytes += 1;
            debug!("Discarding byte from receive buffer: {:02x}", discarded);
        }
        extraction
    }

    /// Record that the link was re-established.
    pub fn record_restart(&self) {
        self.inner.lock().restarts += 1;
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.inner.lock().discarded_bytes
    }

    pub fn restarts(&self) -> u64 {
        self.inner.lock().restarts
    }

    /// Zero the link counters; buffered bytes are kept.
    pub fn reset_counters(&self) {
        let mut state = self.inner.lock();
        state.discarded_bytes = 0;
        state.restarts = 0;
    }
}
