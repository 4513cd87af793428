use snafu::ensure;

use crate::error;
use crate::error::Result;

/// Length of the metadata section. Unit is byte.
pub(crate) const METADATA_LEN: usize = 4 * 4;

/// Typed view over the metadata section of the mapped region.
///
/// ## The underlying structure
///
/// ```text
/// +-------------------+-------------------+-------------------+-------------------+
/// | version           | write_head        | read_commit       | wrap_at           |
/// +-------------------+-------------------+-------------------+-------------------+
/// | 4 bytes           | 4 bytes           | 4 bytes           | 4 bytes           |
/// +-------------------+-------------------+-------------------+-------------------+
/// ```
///
/// All fields are stored little-endian. Loads and stores go through the
/// accessors below, which canonicalize on every access, so the on-disk image
/// is identical regardless of host byte order.
#[derive(Copy, Clone, Debug)]
pub struct Metadata {
    /// The raw pointer to the format version tag.
    version_ptr: *mut u32,

    /// The raw pointer to write_head which is the next write position in the
    /// data span.
    write_head_ptr: *mut u32,

    /// The raw pointer to read_commit which is the last committed read
    /// position in the data span.
    read_commit_ptr: *mut u32,

    /// The raw pointer to wrap_at which marks where the previous lap ended.
    /// Zero means no wrap is outstanding.
    wrap_at_ptr: *mut u32,
}

impl Metadata {
    /// Create a new view over `len` bytes at `metadata_ptr`.
    ///
    /// # Safety
    /// `metadata_ptr` must stay valid for reads and writes of `len` bytes
    /// for the lifetime of the view.
    pub unsafe fn new(metadata_ptr: *mut u8, len: usize) -> Result<Self> {
        ensure!(
            len == METADATA_LEN,
            error::WrongMetadataSizeSnafu {
                expected: METADATA_LEN,
                actual: len,
            }
        );

        let version_ptr = metadata_ptr as *mut u32;
        let write_head_ptr = unsafe { version_ptr.add(1) };
        let read_commit_ptr = unsafe { version_ptr.add(2) };
        let wrap_at_ptr = unsafe { version_ptr.add(3) };

        Ok(Self {
            version_ptr,
            write_head_ptr,
            read_commit_ptr,
            wrap_at_ptr,
        })
    }

    pub fn version(&self) -> u32 {
        load(self.version_ptr)
    }

    pub fn set_version(&self, version: u32) {
        store(self.version_ptr, version);
    }

    /// Get the byte offset of the next write within the data span.
    pub fn write_head(&self) -> u32 {
        load(self.write_head_ptr)
    }

    pub fn set_write_head(&self, offset: u32) {
        store(self.write_head_ptr, offset);
    }

    /// Get the byte offset of the last committed read within the data span.
    /// This is the only read-side state that survives a restart.
    pub fn read_commit(&self) -> u32 {
        load(self.read_commit_ptr)
    }

    pub fn set_read_commit(&self, offset: u32) {
        store(self.read_commit_ptr, offset);
    }

    /// Get the byte offset past the last packet of the previous lap, or zero
    /// when writer and committed reader are on the same lap.
    pub fn wrap_at(&self) -> u32 {
        load(self.wrap_at_ptr)
    }

    pub fn set_wrap_at(&self, offset: u32) {
        store(self.wrap_at_ptr, offset);
    }
}

// The pointers may be unaligned when the view sits over a plain byte buffer
// rather than a page-aligned mapping.
fn load(ptr: *mut u32) -> u32 {
    u32::from_le(unsafe { ptr.read_unaligned() })
}

fn store(ptr: *mut u32, value: u32) {
    unsafe { ptr.write_unaligned(value.to_le()) }
}
