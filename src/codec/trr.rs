//! The uncompressed GROMACS trr format.
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::xdr::{
    boxvec_from_rows, padding, read_f32, read_f32s, read_f64, read_f64s_as_f32, read_i32,
    read_string,
};
use super::{Decoder, Status};
use crate::error::CodecError;
use crate::offsets::OffsetIndex;
use crate::{BoxVec, Frame};

/// Header of one trr frame, with the section sizes in bytes.
#[derive(Debug, Clone, PartialEq)]
struct Header {
    natoms: usize,
    /// Whether reals are stored as `f64` rather than `f32`.
    double: bool,
    time: f32,
    box_size: u64,
    vir_size: u64,
    pres_size: u64,
    x_size: u64,
    v_size: u64,
    f_size: u64,
    /// Number of bytes the header itself takes up.
    nbytes: u64,
}

impl Header {
    /// Size of the whole frame, header included.
    fn frame_size(&self) -> u64 {
        self.nbytes
            + self.box_size
            + self.vir_size
            + self.pres_size
            + self.x_size
            + self.v_size
            + self.f_size
    }

    fn real_size(&self) -> u64 {
        if self.double {
            8
        } else {
            4
        }
    }
}

fn read_size<R: Read>(file: &mut R, what: &str) -> Result<u64, CodecError> {
    let size = read_i32(file)?;
    u64::try_from(size).map_err(|_| CodecError::corrupt(format!("negative {what} size {size}")))
}

fn read_real<R: Read>(file: &mut R, double: bool) -> io::Result<f32> {
    if double {
        Ok(read_f64(file)? as f32)
    } else {
        read_f32(file)
    }
}

fn read_reals<R: Read>(file: &mut R, double: bool, buf: &mut [f32]) -> io::Result<()> {
    if double {
        read_f64s_as_f32(file, buf)
    } else {
        read_f32s(file, buf)
    }
}

/// Reader for one trr file.
#[derive(Debug)]
pub struct TrrDecoder {
    file: BufReader<File>,
    natoms: u32,
}

impl TrrDecoder {
    pub const MAGIC: i32 = 1993;
    const MAX_VERSION_LEN: usize = 128;

    /// Reads a frame header, or returns [`None`] if the reader is exactly at the end.
    fn read_header<R: Read>(file: &mut R) -> Result<Option<Header>, CodecError> {
        let magic = match read_i32(file) {
            Ok(magic) => magic,
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if magic != Self::MAGIC {
            return Err(CodecError::Magic {
                found: magic,
                expected: Self::MAGIC,
            });
        }
        let _slen = read_i32(file)?;
        let version = read_string(file, Self::MAX_VERSION_LEN)?;
        let version_size = 4 + (version.len() + padding(version.len())) as u64;

        let ir_size = read_size(file, "input record")?;
        let e_size = read_size(file, "energy")?;
        let box_size = read_size(file, "box")?;
        let vir_size = read_size(file, "virial")?;
        let pres_size = read_size(file, "pressure")?;
        let top_size = read_size(file, "topology")?;
        let sym_size = read_size(file, "symbol table")?;
        let x_size = read_size(file, "position")?;
        let v_size = read_size(file, "velocity")?;
        let f_size = read_size(file, "force")?;
        let natoms = read_i32(file)?;
        let _step = read_i32(file)?;
        let _nre = read_i32(file)?;

        if ir_size + e_size + top_size + sym_size != 0 {
            return Err(CodecError::unsupported(
                "frames carrying input records, energies or topologies",
            ));
        }
        let natoms = u64::try_from(natoms)
            .map_err(|_| CodecError::corrupt(format!("negative atom count {natoms}")))?;

        // The size of a real is not stored directly, so work it out from whichever section is
        // present.
        let real_size = if box_size != 0 {
            box_size / 9
        } else if natoms == 0 {
            4
        } else if x_size != 0 {
            x_size / (natoms * 3)
        } else if v_size != 0 {
            v_size / (natoms * 3)
        } else {
            f_size / (natoms * 3)
        };
        let double = match real_size {
            4 => false,
            8 => true,
            weird => {
                return Err(CodecError::corrupt(format!(
                    "section sizes imply {weird}-byte reals"
                )))
            }
        };
        for (what, size, expected) in [
            ("box", box_size, 9 * real_size),
            ("virial", vir_size, 9 * real_size),
            ("pressure", pres_size, 9 * real_size),
            ("position", x_size, 3 * natoms * real_size),
            ("velocity", v_size, 3 * natoms * real_size),
            ("force", f_size, 3 * natoms * real_size),
        ] {
            if size != 0 && size != expected {
                return Err(CodecError::corrupt(format!(
                    "{what} section is {size} bytes, expected {expected}"
                )));
            }
        }

        let time = read_real(file, double)?;
        let _lambda = read_real(file, double)?;

        Ok(Some(Header {
            natoms: natoms as usize,
            double,
            time,
            box_size,
            vir_size,
            pres_size,
            x_size,
            v_size,
            f_size,
            nbytes: 8 + version_size + 13 * 4 + 2 * real_size,
        }))
    }
}

impl Decoder for TrrDecoder {
    const TO_ANGSTROM: f32 = 10.0;

    fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let header = Self::read_header(&mut file)?.ok_or_else(|| {
            CodecError::corrupt("file holds no frame to read the atom count from")
        })?;
        let natoms = u32::try_from(header.natoms)
            .map_err(|_| CodecError::corrupt("atom count does not fit in 32 bits"))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self { file, natoms })
    }

    fn natoms(&self) -> u32 {
        self.natoms
    }

    /// Walks the frame headers, skipping the data sections.
    ///
    /// A trailing frame that does not fit in the file is taken to be still in the process of
    /// being written, and is left out.
    fn scan(path: &Path) -> Result<OffsetIndex, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let len = file.get_ref().metadata()?.len();

        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset < len {
            let header = match Self::read_header(&mut file) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(CodecError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            };
            let size = header.frame_size();
            if offset + size > len {
                break;
            }

            offsets.push(offset);
            file.seek_relative((size - header.nbytes) as i64)?;
            offset += size;
        }

        OffsetIndex::from_scan(offsets)
    }

    fn seek(&mut self, offset: u64) -> Result<(), CodecError> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn decode_next(&mut self, frame: &mut Frame) -> Result<Status, CodecError> {
        let file = &mut self.file;
        let header = match Self::read_header(file)? {
            Some(header) => header,
            None => return Ok(Status::EndOfStream),
        };
        if header.natoms != self.natoms as usize {
            return Err(CodecError::corrupt(format!(
                "frame has {} atoms, but the trajectory has {}",
                header.natoms, self.natoms
            )));
        }
        if header.x_size == 0 {
            return Err(CodecError::corrupt("frame holds no positions"));
        }

        frame.time = header.time;
        frame.boxvec = if header.box_size != 0 {
            let mut rows = [0.0; 9];
            read_reals(file, header.double, &mut rows)?;
            boxvec_from_rows(rows)
        } else {
            BoxVec::ZERO
        };
        file.seek_relative((header.vir_size + header.pres_size) as i64)?;

        frame.positions.resize(header.natoms * 3, 0.0);
        read_reals(file, header.double, &mut frame.positions)?;

        // Leave the reader at the start of the next frame.
        file.seek_relative((header.v_size + header.f_size) as i64)?;
        debug_assert_eq!(header.x_size, header.natoms as u64 * 3 * header.real_size());

        Ok(Status::Read)
    }
}
