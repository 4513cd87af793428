use std::ffi::c_void;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::mem::ManuallyDrop;
use std::num::NonZeroUsize;
use std::os::fd::IntoRawFd;
use std::path::Path;
use std::ptr::NonNull;

use nix::sys::mman;
use nix::sys::mman::MapFlags;
use nix::sys::mman::MmapAdvise;
use nix::sys::mman::MsFlags;
use nix::sys::mman::ProtFlags;
use snafu::ensure;
use snafu::ResultExt;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error;
use crate::error::Result;
use crate::ringbuf::frame;
use crate::ringbuf::metadata::METADATA_LEN;
use crate::ringbuf::Packets;
use crate::ringbuf::RingBuffer;

/// The on-disk format tag stored in the metadata section.
const FORMAT_VERSION: u32 = 1;

/// Smallest file that can hold the metadata section and one minimal packet.
const MIN_FILE_LEN: usize = METADATA_LEN + frame::HEADER_LEN + 1;

/// A packet ring buffer persisted in a memory-mapped file.
///
/// A single producer pushes length-delimited packets; a single consumer pops
/// them in FIFO order. When the buffer fills, new pushes overwrite the
/// oldest unread packets instead of blocking. Reopening the same file
/// resumes consumption from the last committed read position, so a process
/// restart loses at most the packets handed out by the final, uncommitted
/// pop.
///
/// State reaches the disk when the OS writes the dirty pages back, or
/// synchronously via [`flush`](DurableRingBuffer::flush). There are no
/// checksums and no torn-write recovery: durability is "survives a clean
/// close plus an explicit flush".
///
/// The buffer is a passive structure with no internal locking. Producer and
/// consumer may live on different threads only if the caller provides the
/// happens-before relationship itself.
pub struct DurableRingBuffer {
    ring: RingBuffer,
    mapping: Mapping,
    file: File,
}

// Single owner at a time, which may migrate across threads.
unsafe impl Send for DurableRingBuffer {}

impl DurableRingBuffer {
    /// Open the ring buffer at `path`, creating a zero-filled file of
    /// `size_kib` KiB when it does not exist yet.
    pub fn open(path: impl AsRef<Path>, size_kib: usize) -> Result<Self> {
        let path = path.as_ref();

        // 1. Open the backing file, creating and zero-filling if absent.
        let (file, is_new) = open_or_create(path, size_kib)?;
        let file_len = file.metadata().context(error::IoSnafu)?.len();
        let file_len = usize::try_from(file_len)
            .context(error::LenOverflowSnafu { len: file_len })?;
        ensure!(
            file_len >= MIN_FILE_LEN,
            error::FileTooSmallSnafu {
                actual: file_len,
                minimum: MIN_FILE_LEN,
            }
        );

        // 2. Map the whole file shared, read/write.
        let mmap_len = NonZeroUsize::new(file_len).unwrap();
        let ptr = unsafe {
            mman::mmap(
                None,
                mmap_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
            .context(error::MmapSnafu)?
        };
        let mapping = Mapping {
            ptr,
            len: file_len,
        };

        // 3. Access is strictly linear.
        if let Err(e) = unsafe {
            mman::madvise(mapping.ptr, mapping.len, MmapAdvise::MADV_SEQUENTIAL)
        } {
            warn!("madvise(MADV_SEQUENTIAL) failed: {}", e);
        }

        // 4. Hand the metadata and data spans to the ring engine.
        let base = mapping.ptr.as_ptr() as *mut u8;
        let ring = unsafe {
            RingBuffer::new(
                base,
                METADATA_LEN,
                base.add(METADATA_LEN),
                file_len - METADATA_LEN,
            )?
        };

        // 5. Stamp the format version on creation, check it on reopen.
        if is_new {
            ring.set_version(FORMAT_VERSION);
        } else {
            let version = ring.version();
            ensure!(
                version == FORMAT_VERSION,
                error::UnsupportedVersionSnafu { version }
            );
        }

        debug!(
            len = file_len,
            new = is_new,
            "opened ring buffer at {}",
            path.display(),
        );

        Ok(DurableRingBuffer {
            ring,
            mapping,
            file,
        })
    }

    /// Append one packet, overwriting the oldest unread packets when the
    /// buffer is full.
    ///
    /// # Panics
    /// Panics if the packet cannot fit even an empty buffer.
    pub fn push_one(&mut self, payload: &[u8]) {
        self.ring.push_one(payload);
    }

    /// Append packets in order.
    pub fn push_n<P: AsRef<[u8]>>(&mut self, payloads: &[P]) {
        self.ring.push_n(payloads);
    }

    /// Pop a single packet in FIFO order, or `None` when the buffer is
    /// empty. The slice borrows the mapped file and is valid until the next
    /// mutating call.
    pub fn pop_one(&mut self) -> Option<&[u8]> {
        self.ring.pop_one()
    }

    /// Pop up to `max` packets in FIFO order, clamped to
    /// [`MAX_BATCH`](crate::MAX_BATCH). Popping commits the packets handed
    /// out by the previous pop; only the committed position survives a
    /// restart.
    pub fn pop_n(&mut self, max: usize) -> Packets<'_> {
        self.ring.pop_n(max)
    }

    /// Synchronously push the mapped state to durable storage.
    pub fn flush(&self) -> Result<()> {
        unsafe {
            mman::msync(self.mapping.ptr, self.mapping.len, MsFlags::MS_SYNC)
        }
        .context(error::MsyncSnafu)
    }

    /// Unmap and close the backing file. Does not imply
    /// [`flush`](DurableRingBuffer::flush); call that first when the final
    /// state must hit the disk before this returns.
    pub fn close(self) -> Result<()> {
        let DurableRingBuffer {
            ring,
            mapping,
            file,
        } = self;

        drop(ring);
        mapping.unmap()?;
        nix::unistd::close(file.into_raw_fd()).context(error::CloseFileSnafu)
    }
}

/// Owner of the mmap region. Unmaps on drop as a backstop for buffers that
/// are never explicitly closed.
struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

impl Mapping {
    fn unmap(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        unsafe { mman::munmap(this.ptr, this.len) }
            .context(error::MunmapSnafu)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if let Err(e) = unsafe { mman::munmap(self.ptr, self.len) } {
            error!(
                "munmap failed: {:?}, mmap_addr: {:?}, mmap_len: {}",
                e, self.ptr, self.len
            );
        }
    }
}

/// Open `path` read/write; when it does not exist yet, create it and
/// zero-fill `size_kib * 1024` bytes. Returns the file and whether it was
/// newly created.
fn open_or_create(path: &Path, size_kib: usize) -> Result<(File, bool)> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok((file, false)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .context(error::CreateFileSnafu { path })?;

            let zeros = [0u8; 1024];
            for _ in 0..size_kib {
                file.write_all(&zeros)
                    .context(error::AllocateFileSnafu { path })?;
            }

            Ok((file, true))
        }
        Err(source) => Err(source).context(error::OpenFileSnafu { path }),
    }
}
