use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::codec::{Codec, Format, Status};
use crate::config::Config;
use crate::error::{CodecError, Error, Result};
use crate::offsets::OffsetIndex;
use crate::{BoxVec, Frame};

/// One trajectory file with an open decoder and the offsets of its frames.
///
/// Frames are decoded into a buffer owned by the trajectory, which is overwritten by every
/// decode.
#[derive(Debug)]
pub struct SingleFileTrajectory {
    path: PathBuf,
    format: Format,
    config: Config,
    natoms: u32,
    index: OffsetIndex,
    /// Unit cell of the first frame, in angstrom. [`None`] until frame 0 has been decoded.
    boxvec: Option<BoxVec>,
    /// [`None`] once the handle has been closed.
    codec: Option<Codec>,
    buffer: Frame,
}

impl SingleFileTrajectory {
    /// Opens the trajectory at `path`, choosing the decoder from its extension.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let format = Format::from_path(&path)?;
        let codec = format.open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let natoms = codec.natoms();
        debug!("opened {} ({format}, {natoms} atoms)", path.display());

        let mut trajectory = Self {
            path,
            format,
            config: config.clone(),
            natoms,
            index: OffsetIndex::default(),
            boxvec: None,
            codec: Some(codec),
            buffer: Frame::with_natoms(natoms as usize),
        };
        trajectory.update(false)?;
        Ok(trajectory)
    }

    /// Brings the offset index up to date with the file, returning the new frame count.
    ///
    /// With `force`, the file is always scanned again. Otherwise a current side-car index is
    /// reused.
    pub fn update(&mut self, force: bool) -> Result<u64> {
        self.index = if force {
            OffsetIndex::rebuild(&self.path, self.format, &self.config)?
        } else {
            OffsetIndex::load_or_build(&self.path, self.format, &self.config)?
        };
        self.fill_unit_cell();
        Ok(self.frame_count())
    }

    /// Reads the unit cell from frame 0 if that has not happened yet.
    ///
    /// A frame 0 that fails to decode is logged and tried again on the next update.
    fn fill_unit_cell(&mut self) {
        if self.boxvec.is_some() || self.frame_count() == 0 {
            return;
        }
        if let Err(err) = self.frame(0) {
            warn!("no unit cell for {}: {err}", self.path.display());
        }
    }

    /// Decodes frame `index` and returns it, with lengths in angstrom.
    ///
    /// The returned frame is the internal buffer and is overwritten by the next decode.
    pub fn frame(&mut self, index: u64) -> Result<&Frame> {
        let offset = self
            .index
            .get(index)
            .ok_or_else(|| Error::frame_out_of_range(&self.path, index, self.frame_count()))?;

        let mut codec = match self.codec.take() {
            Some(codec) => codec,
            None => {
                debug!("reopening {}", self.path.display());
                self.format.open(&self.path).map_err(|source| Error::Open {
                    path: self.path.clone(),
                    source,
                })?
            }
        };
        let decoded = codec
            .seek(offset)
            .and_then(|()| codec.decode_next(&mut self.buffer));
        self.codec = Some(codec);

        let decode_error = |source| Error::Decode {
            path: self.path.clone(),
            frame: index,
            source,
        };
        match decoded {
            Ok(Status::Read) => {}
            Ok(Status::EndOfStream) => {
                return Err(decode_error(CodecError::corrupt(
                    "file ends before an indexed frame",
                )))
            }
            Err(source) => return Err(decode_error(source)),
        }

        let scale = self.format.to_angstrom();
        if scale != 1.0 {
            self.buffer.positions.iter_mut().for_each(|v| *v *= scale);
            self.buffer.boxvec *= scale;
        }
        self.buffer.index = index;
        if index == 0 && self.boxvec.is_none() {
            self.boxvec = Some(self.buffer.boxvec);
        }
        Ok(&self.buffer)
    }

    /// Decodes frame `index` into `frame`, reusing its allocation.
    pub fn read_frame(&mut self, index: u64, frame: &mut Frame) -> Result<()> {
        frame.clone_from(self.frame(index)?);
        Ok(())
    }

    /// Releases the file handle. Calling this more than once does nothing.
    ///
    /// A later decode opens the file again.
    pub fn close(&mut self) {
        if self.codec.take().is_some() {
            debug!("closed {}", self.path.display());
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn atom_count(&self) -> u32 {
        self.natoms
    }

    pub fn frame_count(&self) -> u64 {
        self.index.frame_count()
    }

    pub fn offsets(&self) -> &OffsetIndex {
        &self.index
    }

    /// The unit cell of the first frame.
    ///
    /// Zero while frame 0 has not been decoded, which is the case for an empty trajectory.
    pub fn unit_cell(&self) -> BoxVec {
        self.boxvec.unwrap_or(BoxVec::ZERO)
    }
}

impl Drop for SingleFileTrajectory {
    fn drop(&mut self) {
        self.close();
    }
}
