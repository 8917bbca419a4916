use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use glam::Vec3;

use crate::codec::Format;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::selection::{AtomSelection, FrameSelection};
use crate::trajectory::SingleFileTrajectory;
use crate::{BoxVec, Frame};

/// Locks `mutex`, carrying on with the data of a holder that panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Part files presented as one trajectory.
///
/// Frame `i` of the collection is frame `i - n` of the part that the cumulative frame counts
/// `n` of the preceding parts place it in. Each part is behind its own lock, so reads from
/// different parts do not wait for each other.
#[derive(Debug)]
pub struct TrajectoryCollection {
    /// Name used in errors. The logical (split) path when opened through a cache.
    path: PathBuf,
    paths: Vec<PathBuf>,
    parts: Vec<Mutex<SingleFileTrajectory>>,
    format: Format,
    natoms: u32,
    /// Frame count of each part.
    frame_counts: RwLock<Vec<u64>>,
}

impl TrajectoryCollection {
    /// Opens the given part files, ordered by path, under the name of the first part.
    ///
    /// Every part must have the same number of atoms. The unit cell of the collection is the
    /// one of the first part.
    pub fn open(parts: &[PathBuf], config: &Config) -> Result<Self> {
        let name = parts.iter().min().cloned().unwrap_or_default();
        Self::open_named(name, parts, config)
    }

    /// Like [`TrajectoryCollection::open`], but reports errors and [`path`](Self::path) under
    /// `name`, such as the split name the parts were found for.
    pub fn open_named(
        name: impl Into<PathBuf>,
        parts: &[PathBuf],
        config: &Config,
    ) -> Result<Self> {
        let path = name.into();
        let mut paths = parts.to_vec();
        paths.sort();
        paths.dedup();
        if paths.is_empty() {
            return Err(Error::NoParts { path });
        }

        let trajectories = paths
            .iter()
            .map(|part| SingleFileTrajectory::open(part, config))
            .collect::<Result<Vec<_>>>()?;
        let first = &trajectories[0];
        let natoms = first.atom_count();
        if let Some(mismatch) = trajectories.iter().find(|t| t.atom_count() != natoms) {
            return Err(Error::PartMismatch {
                path: mismatch.path().to_path_buf(),
                expected: natoms,
                found: mismatch.atom_count(),
            });
        }
        let format = first.format();
        let frame_counts = trajectories
            .iter()
            .map(SingleFileTrajectory::frame_count)
            .collect();

        Ok(Self {
            path,
            paths,
            parts: trajectories.into_iter().map(Mutex::new).collect(),
            format,
            natoms,
            frame_counts: RwLock::new(frame_counts),
        })
    }

    /// Finds the part holding frame `index`, and the index of the frame within that part.
    fn locate(&self, index: u64) -> Result<(usize, u64)> {
        let counts = self
            .frame_counts
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut start = 0;
        for (part, &count) in counts.iter().enumerate() {
            if index < start + count {
                return Ok((part, index - start));
            }
            start += count;
        }
        Err(Error::frame_out_of_range(&self.path, index, start))
    }

    /// Decodes frame `index` into `frame`, reusing its allocation.
    pub fn read_frame(&self, index: u64, frame: &mut Frame) -> Result<()> {
        let (part, local) = self.locate(index)?;
        lock(&self.parts[part]).read_frame(local, frame)?;
        frame.index = index;
        Ok(())
    }

    pub fn frame(&self, index: u64) -> Result<Frame> {
        let mut frame = Frame::default();
        self.read_frame(index, &mut frame)?;
        Ok(frame)
    }

    /// Returns frame `index` with only the positions of the selected atoms.
    pub fn frame_with_selection(&self, index: u64, selection: &AtomSelection) -> Result<Frame> {
        let natoms = self.natoms as usize;
        selection.validate(natoms, &self.path)?;

        let (part, local) = self.locate(index)?;
        let mut part = lock(&self.parts[part]);
        let decoded = part.frame(local)?;
        let mut positions = Vec::with_capacity(selection.count(natoms) * 3);
        selection.extend_selected(&decoded.positions, &mut positions);
        Ok(Frame {
            index,
            time: decoded.time,
            boxvec: decoded.boxvec,
            positions,
        })
    }

    /// Returns the position of `atom` in each of the selected frames, in selection order.
    pub fn atom_path(&self, atom: usize, frames: &FrameSelection) -> Result<Vec<Vec3>> {
        if atom >= self.natoms as usize {
            return Err(Error::atom_out_of_range(
                &self.path,
                atom as u64,
                self.natoms as u64,
            ));
        }
        let indices = frames.resolve(self.frame_count(), &self.path)?;

        let mut path = Vec::with_capacity(indices.len());
        for index in indices {
            let (part, local) = self.locate(index)?;
            let mut part = lock(&self.parts[part]);
            let frame = part.frame(local)?;
            let coord = frame.coord(atom).ok_or_else(|| {
                Error::atom_out_of_range(&self.path, atom as u64, frame.natoms() as u64)
            })?;
            path.push(coord);
        }
        Ok(path)
    }

    /// Updates the offsets of every part and returns the new total frame count.
    ///
    /// If a part fails to update, the remaining parts keep their current offsets and the
    /// error is returned.
    pub fn update(&self, force: bool) -> Result<u64> {
        let mut counts = self
            .frame_counts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut result = Ok(());
        for (part, count) in self.parts.iter().zip(counts.iter_mut()) {
            let mut part = lock(part);
            if result.is_ok() {
                result = part.update(force).map(drop);
            }
            *count = part.frame_count();
        }
        result?;
        Ok(counts.iter().sum())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths of the parts, in frame order.
    pub fn parts(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The format of the first part.
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn atom_count(&self) -> u32 {
        self.natoms
    }

    pub fn frame_count(&self) -> u64 {
        self.part_frame_counts().iter().sum()
    }

    pub fn part_frame_counts(&self) -> Vec<u64> {
        self.frame_counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The unit cell of the first frame of the first part.
    pub fn unit_cell(&self) -> BoxVec {
        self.parts
            .first()
            .map_or(BoxVec::ZERO, |part| lock(part).unit_cell())
    }
}
