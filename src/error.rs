//! Error taxonomy of the engine.
//!
//! Corruption errors surface to the caller without repair; the engine never
//! attempts in-place fixup. Mutating operations discard their staged state on
//! failure, so a logical error leaves the image bytes untouched.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("image matches no supported format")]
    UnknownFormat,
    #[error("corrupt disk label: {0}")]
    CorruptLabel(&'static str),
    #[error("corrupt boot sector: {0}")]
    CorruptBootSector(&'static str),
    #[error("corrupt cluster chain at cluster {0}")]
    CorruptChain(u32),
    #[error("cluster {0} is cross-linked")]
    CrossLink(u32),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("ambiguous directory entry: {0}")]
    Ambiguous(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("invalid 8.3 name: {0}")]
    InvalidName(String),
    #[error("destination exists and overwrite was not requested: {0}")]
    ExistsAndNoOverwrite(String),
    #[error("volume out of space")]
    OutOfSpace,
    #[error("directory is full")]
    DirectoryFull,
    #[error("operation needs a partition selector on a hard-disk image")]
    PartitionRequired,
    #[error("partition index {index} out of range (volume count {count})")]
    PartitionOutOfRange { index: usize, count: usize },
    #[error("attribute protected: {0}")]
    AttributeProtected(String),
    #[error("volume is read-only")]
    ReadOnlyVolume,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
