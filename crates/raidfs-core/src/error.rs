use thiserror::Error;

/// Error taxonomy for the operation surface. Mount- and
/// format-only variants never reach the FUSE adapter; they fail the
/// process before an operation is ever dispatched.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NoEntry,

    #[error("file exists")]
    Exists,

    #[error("not a directory")]
    NotADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("permission denied")]
    PermissionDenied,

    #[error("no space left on device")]
    NoSpace,

    #[error("out of memory")]
    OutOfMemory,

    #[error("unrecognized RAID mode {0:?}")]
    ModeUnrecognized(String),

    #[error("backing images disagree on run id or mount position")]
    MountMismatch,

    #[error("mirrored images diverge in {0}")]
    MirrorDivergence(&'static str),

    #[error("image too small: need at least {needed} bytes, have {have}")]
    ImageTooSmall { needed: u64, have: u64 },

    #[error("need at least two backing images")]
    TooFewImages,

    #[error("image path exceeds the {0}-byte name limit")]
    NameTooLong(usize),

    #[error("image count exceeds the maximum of {0}")]
    TooManyImages(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("superblock encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("superblock decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl FsError {
    /// Maps an error to the negative errno the FUSE adapter returns.
    /// Mount/format-only variants have no FUSE meaning and fall back to
    /// `EIO`; they are never expected to surface through a mounted op.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NoEntry => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::PermissionDenied => libc::EACCES,
            FsError::NoSpace => libc::ENOSPC,
            FsError::OutOfMemory => libc::ENOMEM,
            _ => libc::EIO,
        }
    }
}
