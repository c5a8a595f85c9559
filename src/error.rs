use thiserror::Error;

/// Error taxonomy for the index core (spec §7).
///
/// One enum, no overloading numeric/pointer sentinels across domains:
/// every failure mode gets its own variant instead of `-EIO` vs `NULL`
/// vs `-1` meaning different things in different callers.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("out of memory")]
    OutOfMemory,
    #[error("no space: leaf cannot be resized and split could not create room")]
    NoSpace,
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid: {0}")]
    Invalid(&'static str),
    #[error("corrupt: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, IndexError>;
