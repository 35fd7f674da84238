//! Bounded input audio buffer.

use parking_lot::Mutex;
use thiserror::Error;

/// Appending would push the buffer past its configured cap. The buffer is
/// left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("audio buffer size limit exceeded (max {cap} bytes)")]
pub struct BufferFull {
    pub cap: usize,
}

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    committed: bool,
    speech_start_ms: u64,
    speech_end_ms: u64,
    /// 0 means unlimited.
    cap: usize,
}

/// Append-only PCM buffer owned by one session. All operations are
/// serialized by a single mutex; none of them block on I/O.
#[derive(Debug, Default)]
pub struct AudioBuffer {
    inner: Mutex<Inner>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cap(cap: usize) -> Self {
        let buffer = Self::new();
        buffer.set_cap(cap);
        buffer
    }

    /// All-or-nothing append: on overflow the buffer is unchanged.
    pub fn append(&self, data: &[u8]) -> Result<(), BufferFull> {
        let mut inner = self.inner.lock();
        if inner.cap > 0 && inner.data.len() + data.len() > inner.cap {
            return Err(BufferFull { cap: inner.cap });
        }
        inner.data.extend_from_slice(data);
        Ok(())
    }

    /// Returns a snapshot copy and marks the buffer committed.
    pub fn commit(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.committed = true;
        inner.data.clone()
    }

    /// Resets bytes, the committed flag, and the speech watermarks.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.data.clear();
        inner.committed = false;
        inner.speech_start_ms = 0;
        inner.speech_end_ms = 0;
    }

    pub fn size(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.lock().committed
    }

    pub fn set_cap(&self, cap: usize) {
        self.inner.lock().cap = cap;
    }

    pub fn cap(&self) -> usize {
        self.inner.lock().cap
    }

    pub fn set_speech_timings(&self, start_ms: u64, end_ms: u64) {
        let mut inner = self.inner.lock();
        inner.speech_start_ms = start_ms;
        inner.speech_end_ms = end_ms;
    }

    pub fn speech_timings(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.speech_start_ms, inner.speech_end_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_commit_roundtrip() {
        let buffer = AudioBuffer::new();
        buffer.append(b"chunk1").unwrap();
        buffer.append(b"chunk2").unwrap();

        assert_eq!(buffer.size(), 12);
        assert_eq!(buffer.commit(), b"chunk1chunk2");
        assert!(buffer.is_committed());
    }

    #[test]
    fn test_cap_boundary() {
        let buffer = AudioBuffer::with_cap(100);

        buffer.append(&[0u8; 50]).unwrap();
        // Exactly up to the cap succeeds.
        buffer.append(&[0u8; 50]).unwrap();
        assert_eq!(buffer.size(), 100);

        // The next append fails and leaves the size unchanged.
        let err = buffer.append(&[0u8; 1]).unwrap_err();
        assert_eq!(err, BufferFull { cap: 100 });
        assert_eq!(buffer.size(), 100);

        // A smaller append still over the cap also fails.
        assert!(buffer.append(&[0u8; 100]).is_err());
        assert_eq!(buffer.size(), 100);

        // The 100-byte prefix is still committable.
        assert_eq!(buffer.commit().len(), 100);
    }

    #[test]
    fn test_zero_cap_is_unlimited() {
        let buffer = AudioBuffer::new();
        assert_eq!(buffer.cap(), 0);
        buffer.append(&[0u8; 64 * 1024]).unwrap();
        assert_eq!(buffer.size(), 64 * 1024);
    }

    #[test]
    fn test_clear_resets_everything() {
        let buffer = AudioBuffer::with_cap(1024);
        buffer.append(b"data").unwrap();
        buffer.set_speech_timings(100, 900);
        buffer.commit();

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_committed());
        assert_eq!(buffer.speech_timings(), (0, 0));
        // The cap survives a clear.
        assert_eq!(buffer.cap(), 1024);
    }

    #[test]
    fn test_commit_returns_copy() {
        let buffer = AudioBuffer::new();
        buffer.append(b"abc").unwrap();
        let snapshot = buffer.commit();
        buffer.append(b"def").unwrap();

        assert_eq!(snapshot, b"abc");
        assert_eq!(buffer.size(), 6);
    }
}
