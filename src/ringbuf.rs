pub mod frame;
pub mod metadata;

use std::slice;

use snafu::ensure;
use snafu::ResultExt;
use tracing::trace;

use frame::HEADER_LEN;
use metadata::Metadata;

use crate::error;
use crate::error::Result;

/// The maximum number of packets a single pop returns. Larger requests are
/// silently clamped.
pub const MAX_BATCH: usize = 1024;

/// The ring engine, which operates in place on a mapped byte region.
///
/// ## The underlying structure
///
/// ```text
///            data span
///                |
///                v
/// +--------------+------------------------------------------------+
/// | metadata     | packets: [len u16 le][payload] [len][payload] …|
/// +--------------+------------------------------------------------+
/// | 16 bytes     | rest of the region                             |
/// +--------------+------------------------------------------------+
/// ```
///
/// A single producer appends length-prefixed packets at `write_head`; a
/// single consumer walks them in FIFO order from its in-memory `next_read`
/// position. When a packet does not fit in the remainder of the span, the
/// producer records the end of the lap in `wrap_at` and restarts at offset
/// zero, overwriting the oldest data. A write interval that covers the
/// committed read position repels it to offset zero, which always starts a
/// valid frame once the ring has wrapped.
///
/// The engine performs no locking and no hot-path allocation. It is a
/// passive structure: producer and consumer may live on different threads
/// only if the caller provides the happens-before edges itself.
pub struct RingBuffer {
    /// The raw pointer to the data span.
    data_ptr: *mut u8,

    /// The length of the data span. Unit is byte.
    data_len: u32,

    /// Typed view over the metadata span.
    meta: Metadata,

    /// The consumer's in-memory position: the next frame to read. Not
    /// persisted; re-seeded from `read_commit` when the engine is attached.
    next_read: u32,

    /// Reusable scratch holding the (start, end) payload ranges of the
    /// packets returned by the last pop.
    packets: Vec<(usize, usize)>,
}

// A single owner may move the engine across threads; anything beyond the
// single-producer / single-consumer contract needs external synchronization.
unsafe impl Send for RingBuffer {}

impl RingBuffer {
    /// Attach the engine to a metadata span and a data span, resuming from
    /// the committed read position stored in the metadata.
    ///
    /// # Safety
    /// Both spans must stay valid for reads and writes for the lifetime of
    /// the engine and must not overlap.
    pub unsafe fn new(
        meta_ptr: *mut u8,
        meta_len: usize,
        data_ptr: *mut u8,
        data_len: usize,
    ) -> Result<Self> {
        let meta = unsafe { Metadata::new(meta_ptr, meta_len)? };

        ensure!(data_len > HEADER_LEN, {
            let detail = format!(
                "data span of {} bytes cannot hold a packet",
                data_len
            );
            error::InvalidParameterSnafu { detail }
        });
        let data_len = u32::try_from(data_len)
            .context(error::LenOverflowSnafu { len: data_len as u64 })?;

        let next_read = meta.read_commit();

        Ok(RingBuffer {
            data_ptr,
            data_len,
            meta,
            next_read,
            packets: Vec::with_capacity(MAX_BATCH),
        })
    }

    /// Append one packet, overwriting the oldest unread data when the span
    /// is full.
    ///
    /// # Panics
    /// Panics if the payload cannot fit even an empty data span.
    pub fn push_one(&mut self, payload: &[u8]) {
        let limit =
            (self.data_len as usize - HEADER_LEN).min(u16::MAX as usize);
        if payload.len() > limit {
            panic!(
                "packet of {} bytes is too large, limit is {}",
                payload.len(),
                limit
            );
        }

        let mut write_from = self.meta.write_head();
        let mut write_to = write_from + (HEADER_LEN + payload.len()) as u32;

        // The first lap is immune: the writer cannot catch a reader it has
        // never lapped. The marker is read off the metadata, so a
        // reattached ring that never wrapped stays immune.
        if self.meta.wrap_at() != 0 {
            self.repel(write_from, write_to);
        }

        if write_to > self.data_len {
            // The frame does not fit in the remainder of the lap. Mark
            // where this lap ends and restart placement at the span base.
            self.meta.set_wrap_at(write_from);
            trace!(wrap_at = write_from, "lap ended");

            write_from = 0;
            write_to = (HEADER_LEN + payload.len()) as u32;
            self.repel(write_from, write_to);
        }

        // Payload bytes land before the head moves, so a reader never sees
        // a published frame with unwritten bytes.
        frame::write(self.data_mut(), write_from, payload);
        self.meta.set_write_head(write_to);
    }

    /// [`push_one`](RingBuffer::push_one) applied in order.
    pub fn push_n<P: AsRef<[u8]>>(&mut self, payloads: &[P]) {
        let write_from = self.meta.write_head();
        for payload in payloads {
            self.push_one(payload.as_ref());
        }
        trace!(
            count = payloads.len(),
            "wrote [{}, {})",
            write_from,
            self.meta.write_head(),
        );
    }

    /// Pop up to `max` packets in FIFO order, clamped to [`MAX_BATCH`].
    ///
    /// Calling pop also commits the packets handed out by the previous pop:
    /// they will not be re-delivered after a restart. The returned slices
    /// borrow the mapped region and are valid only until the next mutating
    /// call, which the borrow checker enforces; copy them out to keep them.
    pub fn pop_n(&mut self, max: usize) -> Packets<'_> {
        let max = max.min(MAX_BATCH);

        // 1. Commit the previous pop.
        self.meta.set_read_commit(self.next_read);
        self.packets.clear();

        let write_head = self.meta.write_head();
        let wrap_at = self.meta.wrap_at();

        if wrap_at != 0 && self.next_read >= write_head {
            // 2a. The writer is a lap ahead: finish the previous lap up to
            // the wrap marker, then catch up onto the writer's lap.
            let read_to = self.scan_region(self.next_read, wrap_at, max);
            if self.packets.len() >= max {
                self.next_read = read_to;
            } else {
                self.meta.set_wrap_at(0);
                self.next_read = self.scan_region(0, write_head, max);
            }
        } else if self.next_read != write_head {
            // 2b. The reader is on the writer's lap; a marker left behind
            // by a repelled reader is spent.
            if wrap_at != 0 {
                self.meta.set_wrap_at(0);
            }
            self.next_read = self.scan_region(self.next_read, write_head, max);
        }
        // Otherwise nothing is unread: reader and writer share a lap.

        Packets {
            data: self.data(),
            ranges: &self.packets,
        }
    }

    /// Pop a single packet, or `None` when the buffer is empty. The slice
    /// is valid until the next mutating call.
    pub fn pop_one(&mut self) -> Option<&[u8]> {
        self.pop_n(1).get(0)
    }

    pub fn version(&self) -> u32 {
        self.meta.version()
    }

    pub fn set_version(&self, version: u32) {
        self.meta.set_version(version);
    }

    /// Move the committed read position out of the interval about to be
    /// overwritten. Offset zero is the safe harbour: it always starts a
    /// valid frame once the ring has wrapped. The check is half-open so a
    /// frame beginning exactly at `write_to` survives, which keeps
    /// "`next_read == write_head`" meaning empty.
    fn repel(&mut self, write_from: u32, write_to: u32) {
        let read_commit = self.meta.read_commit();
        if write_from <= read_commit && read_commit < write_to {
            trace!(from = read_commit, "committed read repelled");
            self.meta.set_read_commit(0);
        }
        if write_from <= self.next_read && self.next_read < write_to {
            self.next_read = 0;
        }
    }

    /// Decode frames in `[read_from, read_to)` until the batch limit is
    /// reached, appending payload ranges to the reusable list. Returns
    /// where scanning stopped.
    fn scan_region(&mut self, read_from: u32, read_to: u32, max: usize) -> u32 {
        trace!("read [{}, {})", read_from, read_to);

        let mut pos = read_from;
        while pos < read_to && self.packets.len() < max {
            let (payload, next) = frame::read(self.data(), pos);
            trace!(at = pos, size = payload.len(), "read frame");
            self.packets.push((pos as usize + HEADER_LEN, next as usize));
            pos = next;
        }

        pos
    }

    fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data_ptr, self.data_len as usize) }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        unsafe {
            slice::from_raw_parts_mut(self.data_ptr, self.data_len as usize)
        }
    }
}

/// A batch of popped packets, in FIFO order.
///
/// The packets borrow the mapped region; they are invalidated by the next
/// mutating call on the buffer.
pub struct Packets<'a> {
    data: &'a [u8],
    ranges: &'a [(usize, usize)],
}

impl<'a> Packets<'a> {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Get the `index`-th packet of the batch.
    pub fn get(&self, index: usize) -> Option<&'a [u8]> {
        let data = self.data;
        self.ranges
            .get(index)
            .map(move |&(start, end)| &data[start..end])
    }

    /// Iterate the packets in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> {
        let data = self.data;
        self.ranges.iter().map(move |&(start, end)| &data[start..end])
    }
}
