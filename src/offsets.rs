//! The frame to byte offset table of a single trajectory file, and its side-car persistence.
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;

use crate::codec::Format;
use crate::config::Config;
use crate::error::{CodecError, Error, Result};

/// Problems with a persisted index. These never leave this module.
#[derive(Debug, Error)]
enum IndexError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("corrupt offset index: {0}")]
    Corrupt(String),
}

/// Byte offsets of the frames in one trajectory file.
///
/// The offsets are strictly increasing, and `offsets()[i]` is where frame `i` starts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OffsetIndex {
    offsets: Vec<u64>,
}

impl OffsetIndex {
    const MAGIC: [u8; 8] = *b"TVOFFSET";
    const NBYTES_HEADER: usize = 16;

    /// Creates an index from the offsets found by a format scan.
    pub fn from_scan(offsets: Vec<u64>) -> std::result::Result<Self, CodecError> {
        if !is_strictly_increasing(&offsets) {
            return Err(CodecError::corrupt(
                "frame offsets are not strictly increasing",
            ));
        }
        Ok(Self { offsets })
    }

    pub fn frame_count(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Returns the offset of frame `index`, if it exists.
    pub fn get(&self, index: u64) -> Option<u64> {
        let index = usize::try_from(index).ok()?;
        self.offsets.get(index).copied()
    }

    /// Loads the side-car index of `path` if it is usable, and builds a fresh one otherwise.
    ///
    /// A side-car is usable when it is at least as new as the trajectory and parses. A broken
    /// side-car is replaced, once, by a rebuild.
    pub fn load_or_build(path: &Path, format: Format, config: &Config) -> Result<Self> {
        if config.persist_offsets && format.needs_scan() {
            let sidecar = config.offsets_path(path);
            match Self::load(path, &sidecar) {
                Ok(Some(index)) => {
                    debug!(
                        "loaded {} frame offsets from {}",
                        index.frame_count(),
                        sidecar.display()
                    );
                    return Ok(index);
                }
                Ok(None) => {}
                Err(err) => warn!("discarding offset index {}: {err}", sidecar.display()),
            }
        }
        Self::rebuild(path, format, config)
    }

    /// Scans `path` for its frame offsets and persists the result where applicable.
    ///
    /// Failing to write the side-car is logged and otherwise ignored.
    pub fn rebuild(path: &Path, format: Format, config: &Config) -> Result<Self> {
        let index = format.scan(path).map_err(|source| Error::Scan {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            "scanned {} frames in {}",
            index.frame_count(),
            path.display()
        );

        if config.persist_offsets && format.needs_scan() {
            let sidecar = config.offsets_path(path);
            if let Err(err) = index.persist(&sidecar) {
                warn!(
                    "could not write offset index {}: {err}",
                    sidecar.display()
                );
            }
        }
        Ok(index)
    }

    /// Reads the side-car at `sidecar`, or returns [`None`] if there is none or it is older
    /// than the trajectory at `path`.
    fn load(path: &Path, sidecar: &Path) -> std::result::Result<Option<Self>, IndexError> {
        let sidecar_meta = match fs::metadata(sidecar) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let source_meta = fs::metadata(path)?;
        if sidecar_meta.modified()? < source_meta.modified()? {
            debug!("offset index {} is out of date", sidecar.display());
            return Ok(None);
        }

        let index = Self::from_bytes(&fs::read(sidecar)?)?;
        if let Some(&last) = index.offsets.last() {
            if last >= source_meta.len() {
                return Err(IndexError::Corrupt(format!(
                    "offset {last} lies beyond the end of the trajectory"
                )));
            }
        }
        Ok(Some(index))
    }

    /// Writes the index next to the trajectory, replacing any previous side-car as a whole.
    ///
    /// The bytes go to a uniquely named file in the same directory first, so concurrent
    /// writers never see each other's partial output.
    fn persist(&self, sidecar: &Path) -> io::Result<()> {
        let dir = match sidecar.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".trajview-offsets")
            .tempfile_in(dir)?;
        tmp.write_all(&self.to_bytes())?;
        tmp.persist(sidecar).map_err(|err| err.error)?;
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::NBYTES_HEADER + self.offsets.len() * 8);
        bytes.extend(Self::MAGIC);
        bytes.extend(self.frame_count().to_le_bytes());
        for offset in &self.offsets {
            bytes.extend(offset.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, IndexError> {
        if bytes.len() < Self::NBYTES_HEADER {
            return Err(IndexError::Corrupt(format!(
                "file of {} bytes is too short",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(Self::NBYTES_HEADER);
        if header[..8] != Self::MAGIC {
            return Err(IndexError::Corrupt("missing magic".to_string()));
        }
        let frame_count = le_u64(&header[8..]);
        let expected = frame_count
            .checked_mul(8)
            .and_then(|n| n.checked_add(Self::NBYTES_HEADER as u64));
        if expected != Some(bytes.len() as u64) {
            return Err(IndexError::Corrupt(format!(
                "{frame_count} frames do not fit a file of {} bytes",
                bytes.len()
            )));
        }

        let offsets: Vec<u64> = body.chunks_exact(8).map(le_u64).collect();
        if !is_strictly_increasing(&offsets) {
            return Err(IndexError::Corrupt(
                "offsets are not strictly increasing".to_string(),
            ));
        }
        Ok(Self { offsets })
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn is_strictly_increasing(offsets: &[u64]) -> bool {
    offsets.windows(2).all(|w| w[0] < w[1])
}
