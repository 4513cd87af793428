use std::num::TryFromIntError;
use std::path::PathBuf;

use snafu::Location;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("IO error"))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to open file: {}", path.display()))]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create file: {}", path.display()))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to zero-fill file: {}", path.display()))]
    AllocateFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to mmap"))]
    Mmap {
        source: nix::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to msync"))]
    Msync {
        source: nix::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to munmap"))]
    Munmap {
        source: nix::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to close file descriptor"))]
    CloseFile {
        source: nix::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Unsupported file version: {}", version))]
    UnsupportedVersion {
        version: u32,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Metadata section must be {} bytes, got {}",
        expected,
        actual
    ))]
    WrongMetadataSize {
        expected: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "File of {} bytes is too small, minimum is {}",
        actual,
        minimum
    ))]
    FileTooSmall {
        actual: usize,
        minimum: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Invalid parameter, detail: {}", detail))]
    InvalidParameter {
        detail: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Region of {} bytes exceeds the addressable range",
        len
    ))]
    LenOverflow {
        len: u64,
        source: TryFromIntError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
