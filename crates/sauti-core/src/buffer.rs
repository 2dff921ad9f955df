//! Inbound PCM accumulator for one session.
//!
//! Chunks append between commits; a commit (or turn abort) takes everything
//! at once. The buffer is byte-capped: a caller that never commits cannot
//! grow it without bound, and on overflow the whole pending turn is dropped
//! rather than truncated mid-utterance.

use crate::error::{Error, Result};

/// ~8 minutes of 16 kHz mono PCM16.
pub const DEFAULT_MAX_PCM_BYTES: usize = 15 * 1024 * 1024;

#[derive(Debug)]
pub struct PcmBuffer {
    segments: Vec<Vec<u8>>,
    pending_bytes: usize,
    total_chunks: u64,
    max_bytes: usize,
}

impl PcmBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            segments: Vec::new(),
            pending_bytes: 0,
            total_chunks: 0,
            max_bytes,
        }
    }

    /// Append one decoded chunk. On overflow the pending turn is dropped
    /// and the chunk discarded.
    pub fn push(&mut self, chunk: Vec<u8>) -> Result<()> {
        if self.pending_bytes + chunk.len() > self.max_bytes {
            let dropped = self.pending_bytes;
            self.segments.clear();
            self.pending_bytes = 0;
            return Err(Error::Overflow(format!(
                "inbound pcm buffer exceeded {} bytes; dropped {} pending bytes",
                self.max_bytes, dropped
            )));
        }
        self.pending_bytes += chunk.len();
        self.total_chunks += 1;
        self.segments.push(chunk);
        Ok(())
    }

    /// Take and reset the pending turn's audio.
    pub fn take_all(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pending_bytes);
        for segment in self.segments.drain(..) {
            out.extend_from_slice(&segment);
        }
        self.pending_bytes = 0;
        out
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.pending_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.pending_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.pending_bytes == 0
    }

    /// Chunks appended over the session lifetime.
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }
}

impl Default for PcmBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PCM_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_takes_in_order() {
        let mut buf = PcmBuffer::default();
        buf.push(vec![1, 2]).unwrap();
        buf.push(vec![3]).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.total_chunks(), 2);

        assert_eq!(buf.take_all(), vec![1, 2, 3]);
        assert!(buf.is_empty());
        assert_eq!(buf.total_chunks(), 2);
        assert!(buf.take_all().is_empty());
    }

    #[test]
    fn overflow_drops_the_whole_pending_turn() {
        let mut buf = PcmBuffer::new(4);
        buf.push(vec![0; 3]).unwrap();
        let err = buf.push(vec![0; 2]).unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
        assert!(buf.is_empty());

        // The buffer stays usable afterwards.
        buf.push(vec![9; 4]).unwrap();
        assert_eq!(buf.take_all(), vec![9; 4]);
    }
}
