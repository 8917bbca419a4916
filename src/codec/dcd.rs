//! The CHARMM/NAMD dcd format.
//!
//! A dcd file is a sequence of Fortran unformatted records, each framed by a leading and a
//! trailing `i32` byte count. After the header, every frame has the same size, so frame offsets
//! follow from the header and the file length alone.
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::{Decoder, Status};
use crate::error::CodecError;
use crate::offsets::OffsetIndex;
use crate::{BoxVec, Frame};

/// Byte order of a dcd file.
///
/// Files are written in the native order of the machine that produced them, so both occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    fn i32(self, bytes: [u8; 4]) -> i32 {
        match self {
            Endianness::Little => i32::from_le_bytes(bytes),
            Endianness::Big => i32::from_be_bytes(bytes),
        }
    }

    fn f32(self, bytes: [u8; 4]) -> f32 {
        match self {
            Endianness::Little => f32::from_le_bytes(bytes),
            Endianness::Big => f32::from_be_bytes(bytes),
        }
    }

    fn f64(self, bytes: [u8; 8]) -> f64 {
        match self {
            Endianness::Little => f64::from_le_bytes(bytes),
            Endianness::Big => f64::from_be_bytes(bytes),
        }
    }
}

/// The parts of the dcd header that frame access depends on.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    endianness: Endianness,
    natoms: u32,
    /// Whether each frame starts with a unit cell record.
    has_cell: bool,
    /// Size of the header in bytes; the first frame starts here.
    nbytes: u64,
}

impl Header {
    /// Length of the 20-integer control block that follows the `CORD` tag.
    const CONTROL_RECORD_SIZE: i32 = 84;
    const CELL_RECORD_SIZE: i32 = 48;
    const MAX_TITLE_SIZE: usize = 1 << 16;

    fn frame_size(&self) -> u64 {
        let cell = if self.has_cell {
            Self::CELL_RECORD_SIZE as u64 + 8
        } else {
            0
        };
        cell + 3 * (self.natoms as u64 * 4 + 8)
    }

    fn read<R: Read>(file: &mut R) -> Result<Self, CodecError> {
        let mut marker = [0; 4];
        file.read_exact(&mut marker)?;
        let endianness = if i32::from_le_bytes(marker) == Self::CONTROL_RECORD_SIZE {
            Endianness::Little
        } else if i32::from_be_bytes(marker) == Self::CONTROL_RECORD_SIZE {
            Endianness::Big
        } else {
            return Err(CodecError::corrupt(
                "first record marker is not 84 in either byte order",
            ));
        };

        let mut control = [0; 84];
        file.read_exact(&mut control)?;
        if &control[..4] != b"CORD" {
            return Err(CodecError::corrupt("missing 'CORD' tag"));
        }
        let icntrl = |idx: usize| {
            let start = 4 + idx * 4;
            endianness.i32([
                control[start],
                control[start + 1],
                control[start + 2],
                control[start + 3],
            ])
        };
        // A non-zero version in the last slot marks a CHARMM-style file (LAMMPS pretends to be
        // CHARMM version 24). Only those have the extra unit cell and 4D flags.
        let charmm = icntrl(19) != 0;
        let namnf = icntrl(8);
        if namnf != 0 {
            return Err(CodecError::unsupported(format!(
                "dcd files with {namnf} fixed atoms"
            )));
        }
        let has_cell = charmm && icntrl(10) != 0;
        if charmm && icntrl(11) != 0 {
            return Err(CodecError::unsupported("four-dimensional dcd files"));
        }
        expect_marker(file, endianness, Self::CONTROL_RECORD_SIZE)?;

        // The title record: a line count followed by that many 80-character lines.
        let title_size = read_i32(file, endianness)?;
        let title_len = usize::try_from(title_size)
            .ok()
            .filter(|&len| len <= Self::MAX_TITLE_SIZE)
            .ok_or_else(|| CodecError::corrupt(format!("invalid title length {title_size}")))?;
        let mut titles = vec![0; title_len];
        file.read_exact(&mut titles)?;
        expect_marker(file, endianness, title_size)?;

        expect_marker(file, endianness, 4)?;
        let natoms = read_i32(file, endianness)?;
        expect_marker(file, endianness, 4)?;
        let natoms = u32::try_from(natoms)
            .map_err(|_| CodecError::corrupt(format!("negative atom count {natoms}")))?;

        Ok(Self {
            endianness,
            natoms,
            has_cell,
            // Control record, title record and atom count record, each with two markers.
            nbytes: (4 + 84 + 4) + (4 + title_len as u64 + 4) + (4 + 4 + 4),
        })
    }
}

fn read_i32<R: Read>(file: &mut R, endianness: Endianness) -> Result<i32, CodecError> {
    let mut buf = [0; 4];
    file.read_exact(&mut buf)?;
    Ok(endianness.i32(buf))
}

fn expect_marker<R: Read>(
    file: &mut R,
    endianness: Endianness,
    expected: i32,
) -> Result<(), CodecError> {
    let marker = read_i32(file, endianness)?;
    if marker != expected {
        return Err(CodecError::corrupt(format!(
            "record marker is {marker}, expected {expected}"
        )));
    }
    Ok(())
}

/// Reader for one dcd file.
#[derive(Debug)]
pub struct DcdDecoder {
    file: BufReader<File>,
    header: Header,
    /// Raw bytes of the coordinate record being decoded.
    scratch: Vec<u8>,
}

impl DcdDecoder {
    /// Reads one coordinate record into every third value of `positions`, starting at `dim`.
    fn read_axis(&mut self, positions: &mut [f32], dim: usize) -> Result<(), CodecError> {
        let endianness = self.header.endianness;
        let size = i32::try_from(self.header.natoms as u64 * 4)
            .map_err(|_| CodecError::unsupported("coordinate records beyond 2 GiB"))?;
        expect_marker(&mut self.file, endianness, size)?;
        self.scratch.resize(size as usize, 0);
        self.file.read_exact(&mut self.scratch)?;
        expect_marker(&mut self.file, endianness, size)?;

        let values = self
            .scratch
            .chunks_exact(4)
            .map(|b| endianness.f32([b[0], b[1], b[2], b[3]]));
        for (position, value) in positions.chunks_exact_mut(3).zip(values) {
            position[dim] = value;
        }
        Ok(())
    }
}

impl Decoder for DcdDecoder {
    const TO_ANGSTROM: f32 = 1.0;

    fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let header = Header::read(&mut file)?;
        Ok(Self {
            file,
            header,
            scratch: Vec::new(),
        })
    }

    fn natoms(&self) -> u32 {
        self.header.natoms
    }

    /// Frames have a fixed size, so only complete frames that fit in the file are counted.
    fn scan(path: &Path) -> Result<OffsetIndex, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let len = file.get_ref().metadata()?.len();
        let header = Header::read(&mut file)?;

        let frame_size = header.frame_size();
        let nframes = len.saturating_sub(header.nbytes) / frame_size;
        let offsets = (0..nframes).map(|idx| header.nbytes + idx * frame_size);
        OffsetIndex::from_scan(offsets.collect())
    }

    fn seek(&mut self, offset: u64) -> Result<(), CodecError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn decode_next(&mut self, frame: &mut Frame) -> Result<Status, CodecError> {
        let endianness = self.header.endianness;
        let mut marker = [0; 4];
        match self.file.read_exact(&mut marker) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(Status::EndOfStream)
            }
            Err(err) => return Err(err.into()),
        }
        self.file.seek_relative(-4)?;

        frame.boxvec = if self.header.has_cell {
            expect_marker(&mut self.file, endianness, Header::CELL_RECORD_SIZE)?;
            // Stored as [A, gamma, B, beta, alpha, C].
            let mut cell = [0.0; 6];
            for value in &mut cell {
                let mut buf = [0; 8];
                self.file.read_exact(&mut buf)?;
                *value = endianness.f64(buf);
            }
            expect_marker(&mut self.file, endianness, Header::CELL_RECORD_SIZE)?;
            BoxVec::from_diagonal(glam::Vec3::new(
                cell[0] as f32,
                cell[2] as f32,
                cell[5] as f32,
            ))
        } else {
            BoxVec::ZERO
        };

        // The format has no notion of simulation time per frame.
        frame.time = 0.0;
        frame.positions.resize(self.header.natoms as usize * 3, 0.0);
        for dim in 0..3 {
            self.read_axis(&mut frame.positions, dim)?;
        }

        Ok(Status::Read)
    }
}
