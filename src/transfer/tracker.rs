//! Bulk transfer bookkeeping.
//!
//! [`Tracker`] is the receiving side: a reassembly buffer plus one received
//! flag per frame index, answering "lowest index still missing" (the
//! cursor). [`FrameSource`] is the sending side: the whole file in memory,
//! sliced into frame bodies on demand.

use crate::error::{Result, TransferError};
use crate::transfer::protocol::{FRAME_BODY_SIZE, MAX_FILE_LEN};
use bytes::Bytes;

/// Number of frames needed for `file_len` bytes.
pub fn frame_count(file_len: usize) -> usize {
    file_len.div_ceil(FRAME_BODY_SIZE)
}

/// Valid body length of frame `index` in a file of `file_len` bytes.
pub fn body_len(file_len: usize, index: usize) -> usize {
    file_len
        .saturating_sub(index * FRAME_BODY_SIZE)
        .min(FRAME_BODY_SIZE)
}

fn check_len(file_len: usize) -> Result<()> {
    if file_len as u64 > MAX_FILE_LEN {
        return Err(TransferError::FileTooLarge {
            len: file_len as u64,
            max: MAX_FILE_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Receiving side
// =============================================================================

#[derive(Debug)]
pub struct Tracker {
    file_len: usize,
    buffer: Vec<u8>,
    received: Vec<bool>,
    received_count: usize,
}

impl Tracker {
    /// Allocate the reassembly buffer, rounded up to whole frames.
    pub fn new(file_len: usize) -> Result<Self> {
        check_len(file_len)?;
        let count = frame_count(file_len);
        let capacity = count * FRAME_BODY_SIZE;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| TransferError::Allocation(capacity))?;
        buffer.resize(capacity, 0);

        Ok(Self {
            file_len,
            buffer,
            received: vec![false; count],
            received_count: 0,
        })
    }

    pub fn file_len(&self) -> usize {
        self.file_len
    }

    pub fn frame_count(&self) -> usize {
        self.received.len()
    }

    pub fn received_count(&self) -> usize {
        self.received_count
    }

    /// Place `body` at frame `index` unless that frame is already placed.
    ///
    /// Returns `Ok(true)` for a newly placed frame and `Ok(false)` for a
    /// duplicate. Bytes beyond the frame's valid length are ignored.
    pub fn mark_received(&mut self, index: usize, body: &[u8]) -> Result<bool> {
        let count = self.frame_count();
        if index >= count {
            return Err(TransferError::IndexOutOfRange { index, count });
        }
        if self.received[index] {
            return Ok(false);
        }

        let len = body_len(self.file_len, index).min(body.len());
        let offset = index * FRAME_BODY_SIZE;
        self.buffer[offset..offset + len].copy_from_slice(&body[..len]);
        self.received[index] = true;
        self.received_count += 1;
        Ok(true)
    }

    /// Lowest frame index not yet received, `frame_count` when complete.
    pub fn cursor(&self) -> usize {
        self.received
            .iter()
            .position(|r| !r)
            .unwrap_or(self.received.len())
    }

    pub fn is_complete(&self) -> bool {
        self.cursor() == self.frame_count()
    }

    /// The reassembled file, trimmed to its real length.
    pub fn into_contents(mut self) -> Vec<u8> {
        self.buffer.truncate(self.file_len);
        self.buffer
    }
}

// =============================================================================
// Sending side
// =============================================================================

/// File contents addressed by frame index.
#[derive(Debug, Clone)]
pub struct FrameSource {
    data: Bytes,
}

impl FrameSource {
    pub fn new(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        check_len(data.len())?;
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        frame_count(self.data.len())
    }

    /// Body of frame `index`, or `None` past the end of the file.
    pub fn body(&self, index: usize) -> Option<Bytes> {
        if index >= self.frame_count() {
            return None;
        }
        let start = index * FRAME_BODY_SIZE;
        let end = start + body_len(self.data.len(), index);
        Some(self.data.slice(start..end))
    }

    /// Indices of the burst starting at `start`, clipped to the file.
    pub fn burst(&self, start: usize, size: usize) -> std::ops::Range<usize> {
        let end = start.saturating_add(size).min(self.frame_count());
        start.min(end)..end
    }
}
