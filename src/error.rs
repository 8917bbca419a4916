use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the format decoders.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("found invalid magic number '{found}' ({found:#0x}), expected {expected}")]
    Magic { found: i32, expected: i32 },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("unsupported layout: {0}")]
    Unsupported(String),
}

impl CodecError {
    pub fn corrupt(details: impl Into<String>) -> Self {
        Self::Corrupt(details.into())
    }

    pub fn unsupported(details: impl Into<String>) -> Self {
        Self::Unsupported(details.into())
    }
}

/// What an [`Error::OutOfRange`] index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Frame,
    Atom,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Frame => write!(f, "frame"),
            IndexKind::Atom => write!(f, "atom"),
        }
    }
}

/// Errors that reach callers of the frame-access layer.
///
/// Recoverable inconsistencies (a corrupt or unwritable side-car index, a stale cache entry)
/// are handled where they are detected and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("extension '{extension}' of {path} is not a supported trajectory format")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("could not open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("no part files found for split trajectory {path}")]
    NoParts { path: PathBuf },

    #[error("part {path} has {found} atoms, but the first part has {expected}")]
    PartMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("failed to scan frame offsets of {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("{kind} index {index} is out of range for {path} (0..{len})")]
    OutOfRange {
        path: PathBuf,
        kind: IndexKind,
        index: u64,
        len: u64,
    },

    #[error("failed to decode frame {frame} of {path}: {source}")]
    Decode {
        path: PathBuf,
        frame: u64,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn frame_out_of_range(path: impl Into<PathBuf>, index: u64, len: u64) -> Self {
        Self::OutOfRange {
            path: path.into(),
            kind: IndexKind::Frame,
            index,
            len,
        }
    }

    pub(crate) fn atom_out_of_range(path: impl Into<PathBuf>, index: u64, len: u64) -> Self {
        Self::OutOfRange {
            path: path.into(),
            kind: IndexKind::Atom,
            index,
            len,
        }
    }
}
