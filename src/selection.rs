use std::num::NonZeroU64;
use std::ops;
use std::path::Path;

use crate::error::{Error, Result};

/// A selection of atoms.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum AtomSelection {
    /// Include all atoms.
    #[default]
    All,
    /// Half-open ranges of atom indices.
    ///
    /// The positions in each range are concatenated in the order of the ranges. Ranges may
    /// overlap, in which case atoms show up more than once.
    Ranges(Vec<ops::Range<usize>>),
}

impl AtomSelection {
    /// Number of atoms the selection yields from a frame of `natoms` atoms.
    pub fn count(&self, natoms: usize) -> usize {
        match self {
            AtomSelection::All => natoms,
            AtomSelection::Ranges(ranges) => ranges.iter().map(ExactSizeIterator::len).sum(),
        }
    }

    /// Checks every range against a frame of `natoms` atoms.
    ///
    /// Ranges that are reversed or reach past the last atom are out of range. The offending
    /// bound is reported as the index.
    pub fn validate(&self, natoms: usize, path: &Path) -> Result<()> {
        let AtomSelection::Ranges(ranges) = self else {
            return Ok(());
        };
        for range in ranges {
            if range.start > range.end {
                return Err(Error::atom_out_of_range(
                    path,
                    range.start as u64,
                    range.end as u64,
                ));
            }
            if range.end > natoms {
                return Err(Error::atom_out_of_range(path, range.end as u64, natoms as u64));
            }
        }
        Ok(())
    }

    /// Appends the selected values of `positions` to `out`.
    ///
    /// The selection must have been validated against `positions`.
    pub(crate) fn extend_selected(&self, positions: &[f32], out: &mut Vec<f32>) {
        match self {
            AtomSelection::All => out.extend_from_slice(positions),
            AtomSelection::Ranges(ranges) => {
                for range in ranges {
                    out.extend_from_slice(&positions[range.start * 3..range.end * 3]);
                }
            }
        }
    }
}

/// A selection of [`Frame`](crate::Frame)s.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum FrameSelection {
    /// Include all frames that are in a trajectory.
    #[default]
    All,
    /// Include frames that lie within a certain [`Range`].
    Range(Range),
    /// Include the frames in this list, in this order.
    FrameList(Vec<u64>),
}

impl FrameSelection {
    /// Turns the selection into the list of frame indices it stands for in a trajectory of
    /// `frame_count` frames.
    ///
    /// Indices in a list, and the end of a bounded range, must lie within the trajectory.
    pub fn resolve(&self, frame_count: u64, path: &Path) -> Result<Vec<u64>> {
        match self {
            FrameSelection::All => Ok((0..frame_count).collect()),
            FrameSelection::Range(range) => {
                let end = match range.end {
                    Some(end) if end > frame_count => {
                        return Err(Error::frame_out_of_range(path, end, frame_count))
                    }
                    Some(end) => end,
                    None => frame_count,
                };
                let step = range.step.get() as usize;
                Ok((range.start..end).step_by(step).collect())
            }
            FrameSelection::FrameList(indices) => {
                match indices.iter().find(|&&idx| idx >= frame_count) {
                    Some(&idx) => Err(Error::frame_out_of_range(path, idx, frame_count)),
                    None => Ok(indices.clone()),
                }
            }
        }
    }
}

/// A strided range of frames.
///
/// The `start` of a [`Range`] is always bounded, and is zero by default.
/// The `end` may be bounded or unbounded. In case the end is unbounded ([`None`]), the range
/// runs up to and including the last frame. If it is bounded by [`Some`] value, it is an
/// exclusive bound.
/// The `step` describes the number of frames that passed in each stride.
/// The number of skipped frames is equal to `step` - 1.
///
/// # Note
///
/// An instance where `start` > `end` is a valid `Range`, but it selects zero frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: Option<u64>,
    pub step: NonZeroU64,
}

impl Range {
    pub fn new(start: Option<u64>, end: Option<u64>, step: Option<NonZeroU64>) -> Self {
        let mut sel = Self {
            end,
            ..Self::default()
        };
        if let Some(start) = start {
            sel.start = start;
        }
        if let Some(step) = step {
            sel.step = step;
        }
        sel
    }
}

impl Default for Range {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            step: NonZeroU64::MIN,
        }
    }
}
