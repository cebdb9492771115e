//! Collects one downloaded block at a time.

use crate::flash::ERASED_BYTE;
use crate::status::DfuMemError;

/// Holds the block received with the last `DFU_DNLOAD` until it is
/// programmed, and checks that block numbers follow each other.
///
/// `N` is the transfer size: the largest accepted block, and the
/// distance between the flash offsets of two consecutive blocks.
///
/// The same buffer is reused to hold data for `DFU_UPLOAD` replies,
/// upload and download never run at the same time.
pub struct TransferBlock<const N: usize> {
    buffer: [u8; N],
    len: usize,
    pending: bool,
    expected: u16,
    accepted: u32,
    bytes: u32,
    short_seen: bool,
}

impl<const N: usize> TransferBlock<N> {
    /// Create an empty assembler expecting block `0`.
    pub const fn new() -> Self {
        Self {
            buffer: [0; N],
            len: 0,
            pending: false,
            expected: 0,
            accepted: 0,
            bytes: 0,
            short_seen: false,
        }
    }

    /// Start a new download session, the first block must be `first_block`.
    pub fn begin(&mut self, first_block: u16) {
        self.clear();
        self.expected = first_block;
    }

    /// Drop any pending data and the session counters.
    pub fn clear(&mut self) {
        self.len = 0;
        self.pending = false;
        self.expected = 0;
        self.accepted = 0;
        self.bytes = 0;
        self.short_seen = false;
    }

    /// Buffer `data` as block `block_num`.
    ///
    /// Fails with [`DfuMemError::File`] if `data` does not fit a block and with
    /// [`DfuMemError::Address`] if the block is out of sequence, or follows
    /// a short block.
    pub fn accept(&mut self, block_num: u16, data: &[u8]) -> Result<(), DfuMemError> {
        if self.pending {
            return Err(DfuMemError::Unknown);
        }
        if data.len() > N {
            return Err(DfuMemError::File);
        }
        if block_num != self.expected {
            warn!("expected block {}, got {}", self.expected, block_num);
            return Err(DfuMemError::Address);
        }
        if self.short_seen {
            // The previous block was the last one, a hole would follow.
            return Err(DfuMemError::Address);
        }

        self.buffer[..data.len()].copy_from_slice(data);
        self.len = data.len();
        self.pending = true;
        Ok(())
    }

    /// Returns `true` if a block is waiting to be programmed.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Pending block data.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Length of the pending block.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the pending block is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pending block data, padded with erased bytes to a multiple of `align`.
    ///
    /// `N` must be a multiple of `align`.
    pub fn padded(&mut self, align: usize) -> &[u8] {
        let padded = match self.len % align {
            0 => self.len,
            r => self.len + (align - r),
        };
        self.buffer[self.len..padded].fill(ERASED_BYTE);
        &self.buffer[..padded]
    }

    /// Offset of the pending block relative to the start of the region.
    pub fn target_offset(&self) -> u32 {
        self.accepted * N as u32
    }

    /// The pending block was programmed, expect the next one.
    pub fn commit(&mut self) {
        if !self.pending {
            return;
        }
        self.pending = false;
        self.short_seen = self.len < N;
        self.accepted += 1;
        self.bytes += self.len as u32;
        self.expected = self.expected.wrapping_add(1);
    }

    /// Block number the next `DFU_DNLOAD` must carry.
    pub fn expected_block(&self) -> u16 {
        self.expected
    }

    /// Number of blocks programmed in this session.
    pub fn blocks_accepted(&self) -> u32 {
        self.accepted
    }

    /// Number of bytes programmed in this session, padding excluded.
    pub fn bytes_accepted(&self) -> u32 {
        self.bytes
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [u8; N] {
        &mut self.buffer
    }

    pub(crate) fn buffer(&self) -> &[u8; N] {
        &self.buffer
    }
}

impl<const N: usize> Default for TransferBlock<N> {
    fn default() -> Self {
        Self::new()
    }
}
