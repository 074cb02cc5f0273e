//! Kernel error types
//!
//! Every fallible operation in the core returns `Result<T, KernelError>`.
//! Subsystem-local enums exist where a caller close to the fault benefits
//! from matching a narrower type and convert into `KernelError` via `From`.

use core::fmt;

/// Top-level kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No free frame, block, inode, or heap region was available.
    OutOfMemory { requested: usize, available: usize },
    /// A block device, vnode, or path component could not be located.
    NotFound { resource: &'static str },
    /// A null pointer, zero size, out-of-range LBA, bad priority, or
    /// duplicate registration was passed where disallowed.
    InvalidArgument { name: &'static str, value: &'static str },
    /// ELF header validation failed.
    InvalidBinary { reason: &'static str },
    /// A backend `read`/`write` reported a failure.
    IoFailure,
    /// The operation is not implemented by this backend or node type.
    NotSupported { operation: &'static str },
    /// Filesystem-specific error.
    FsError(FsError),
    /// Scheduler-specific error.
    SchedError(SchedError),
}

/// Filesystem-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    DirectoryNotEmpty,
    BadMagic,
    NotSupported,
}

/// Scheduler-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: i32 },
    ProcessNotFound { pid: u32 },
    ThreadNotFound { tid: u32 },
    QueueFull,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::NotFound { resource } => write!(f, "not found: {}", resource),
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::InvalidBinary { reason } => write!(f, "invalid binary: {}", reason),
            Self::IoFailure => write!(f, "I/O failure"),
            Self::NotSupported { operation } => write!(f, "not supported: {}", operation),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::SchedError(e) => write!(f, "scheduler error: {:?}", e),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedError(err)
    }
}

/// Shorthand for constructing common error variants.
#[macro_export]
macro_rules! kernel_error {
    (OutOfMemory { requested: $req:expr, available: $avail:expr }) => {
        $crate::error::KernelError::OutOfMemory {
            requested: $req,
            available: $avail,
        }
    };
    (NotFound { $resource:expr }) => {
        $crate::error::KernelError::NotFound { resource: $resource }
    };
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
}
