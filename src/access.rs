//! Reading frames and atom paths by trajectory path.
use std::path::Path;

use glam::Vec3;

use crate::cache::TrajectoryCache;
use crate::error::Result;
use crate::selection::{AtomSelection, FrameSelection};
use crate::Frame;

impl TrajectoryCache {
    /// Returns frame `index` of the trajectory at `path`, restricted to the selected atoms.
    pub fn get_frame(
        &self,
        path: impl AsRef<Path>,
        index: u64,
        atoms: &AtomSelection,
    ) -> Result<Frame> {
        self.get(path)?.frame_with_selection(index, atoms)
    }

    /// Like [`TrajectoryCache::get_frame`], but as the record described at
    /// [`Frame::to_record`].
    pub fn get_frame_bytes(
        &self,
        path: impl AsRef<Path>,
        index: u64,
        atoms: &AtomSelection,
    ) -> Result<Vec<u8>> {
        let collection = self.get(path)?;
        let frame = collection.frame_with_selection(index, atoms)?;
        Ok(frame.to_record(collection.frame_count()))
    }

    /// Returns the position of `atom` in each selected frame.
    ///
    /// Row `i` of the result belongs to the `i`th requested frame, so a list of three frame
    /// indices gives three positions whatever the indices are.
    pub fn get_path(
        &self,
        path: impl AsRef<Path>,
        atom: usize,
        frames: &FrameSelection,
    ) -> Result<Vec<Vec3>> {
        self.get(path)?.atom_path(atom, frames)
    }

    /// Like [`TrajectoryCache::get_path`], but as tightly packed little-endian `f32` triples.
    pub fn get_path_bytes(
        &self,
        path: impl AsRef<Path>,
        atom: usize,
        frames: &FrameSelection,
    ) -> Result<Vec<u8>> {
        let positions = self.get_path(path, atom, frames)?;
        Ok(positions
            .iter()
            .flat_map(|position| position.to_array())
            .flat_map(f32::to_le_bytes)
            .collect())
    }
}
