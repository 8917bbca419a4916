//! Random access to the frames of molecular-dynamics trajectories.
//!
//! xtc, trr, dcd and NetCDF files are read through one interface. A trajectory may be split
//! over numbered part files, which are then presented as one sequence of frames. Frame offsets
//! of the formats that can only be read sequentially are kept in side-car files, so that a
//! multi-gigabyte file is only scanned once.
//!
//! ```no_run
//! use trajview::{AtomSelection, Config, TrajectoryCache};
//!
//! let cache = TrajectoryCache::new(Config::default());
//! let frame = cache.get_frame("md/@run.xtc", 10, &AtomSelection::Ranges(vec![0..20]))?;
//! println!("{} atoms at t = {} ps", frame.natoms(), frame.time);
//! # Ok::<(), trajview::Error>(())
//! ```
use std::io::{self, Write};

use glam::{Mat3, Vec3};

pub use crate::cache::{discover_split_trajectories, resolve_parts, TrajectoryCache};
pub use crate::codec::Format;
pub use crate::collection::TrajectoryCollection;
pub use crate::config::Config;
pub use crate::error::{CodecError, Error, IndexKind, Result};
pub use crate::offsets::OffsetIndex;
pub use crate::selection::{AtomSelection, FrameSelection, Range};
pub use crate::trajectory::SingleFileTrajectory;

mod access;
mod cache;
pub mod codec;
mod collection;
mod config;
mod error;
mod offsets;
mod selection;
mod trajectory;

/// The unit cell. Each column is one box vector.
pub type BoxVec = Mat3;

#[derive(Debug, Default, PartialEq)]
pub struct Frame {
    /// Index of the frame within its trajectory.
    pub index: u64,
    /// Time in picoseconds.
    pub time: f32,
    /// Unit cell in angstrom.
    pub boxvec: BoxVec,
    /// Positions in angstrom, as consecutive `x, y, z` values.
    pub positions: Vec<f32>,
}

impl Frame {
    pub fn with_natoms(natoms: usize) -> Self {
        Self {
            positions: vec![0.0; natoms * 3],
            ..Self::default()
        }
    }

    pub fn natoms(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn coords(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.positions.chunks_exact(3).map(Vec3::from_slice)
    }

    pub fn coord(&self, atom: usize) -> Option<Vec3> {
        self.positions
            .get(atom * 3..atom * 3 + 3)
            .map(Vec3::from_slice)
    }

    /// Returns the frame as a little-endian record.
    ///
    /// The record holds the frame count of the trajectory as an `i32`, the time, the nine
    /// values of the unit cell with one box vector per row, and finally the positions. All
    /// values are tightly packed. Frame counts beyond `i32::MAX` are written as `i32::MAX`.
    pub fn to_record(&self, frame_count: u64) -> Vec<u8> {
        let frame_count = i32::try_from(frame_count).unwrap_or(i32::MAX);
        let mut bytes = Vec::with_capacity(4 * (11 + self.positions.len()));
        bytes.extend(frame_count.to_le_bytes());
        bytes.extend(self.time.to_le_bytes());
        for v in self.boxvec.to_cols_array().iter().chain(&self.positions) {
            bytes.extend(v.to_le_bytes());
        }
        bytes
    }

    /// Writes the record described at [`Frame::to_record`].
    pub fn write_record<W: Write>(&self, frame_count: u64, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_record(frame_count))
    }
}

// Written out so that `clone_from` reuses the position buffer.
impl Clone for Frame {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            time: self.time,
            boxvec: self.boxvec,
            positions: self.positions.clone(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.index = source.index;
        self.time = source.time;
        self.boxvec = source.boxvec;
        self.positions.clone_from(&source.positions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_are_triples() {
        let frame = Frame {
            positions: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            ..Frame::default()
        };
        assert_eq!(frame.natoms(), 2);
        let coords: Vec<_> = frame.coords().collect();
        assert_eq!(coords, [Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0)]);
        assert_eq!(frame.coord(1), Some(Vec3::new(4.0, 5.0, 6.0)));
        assert_eq!(frame.coord(2), None);
    }

    #[test]
    fn record_layout() {
        let frame = Frame {
            index: 3,
            time: 1.5,
            boxvec: BoxVec::from_cols(
                Vec3::new(1.0, 2.0, 3.0),
                Vec3::new(4.0, 5.0, 6.0),
                Vec3::new(7.0, 8.0, 9.0),
            ),
            positions: vec![-1.0, 0.5, 2.0],
        };
        let bytes = frame.to_record(12);
        assert_eq!(bytes.len(), 4 * (1 + 1 + 9 + 3));

        let words: Vec<[u8; 4]> = bytes
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        assert_eq!(i32::from_le_bytes(words[0]), 12);
        assert_eq!(f32::from_le_bytes(words[1]), 1.5);
        let cell: Vec<f32> = words[2..11].iter().map(|&w| f32::from_le_bytes(w)).collect();
        assert_eq!(cell, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let positions: Vec<f32> = words[11..].iter().map(|&w| f32::from_le_bytes(w)).collect();
        assert_eq!(positions, [-1.0, 0.5, 2.0]);
    }

    #[test]
    fn record_frame_count_saturates() {
        let bytes = Frame::default().to_record(u64::MAX);
        assert_eq!(&bytes[..4], &i32::MAX.to_le_bytes());
    }

    #[test]
    fn written_record_matches() {
        let frame = Frame {
            time: 4.0,
            positions: vec![1.0, 2.0, 3.0],
            ..Frame::default()
        };
        let mut written = Vec::new();
        frame.write_record(2, &mut written).unwrap();
        assert_eq!(written, frame.to_record(2));
    }
}
