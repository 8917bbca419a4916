//! Classic and 64-bit offset NetCDF files following the AMBER trajectory conventions.
//!
//! Only the header is parsed up front. Frames live along the record dimension, so the offset of
//! a frame is the start of its record, and every variable in a frame sits at a fixed distance
//! from that start.
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::xdr::{padding, read_f32, read_f64, read_u32, read_u64};
use super::{Decoder, Status};
use crate::error::CodecError;
use crate::offsets::OffsetIndex;
use crate::{BoxVec, Frame};

const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;
/// Value of the record count while a writer is still streaming records.
const STREAMING: u32 = u32::MAX;
const MAX_NAME_LEN: usize = 1 << 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NcType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
}

impl NcType {
    fn from_tag(tag: u32) -> Result<Self, CodecError> {
        match tag {
            1 => Ok(NcType::Byte),
            2 => Ok(NcType::Char),
            3 => Ok(NcType::Short),
            4 => Ok(NcType::Int),
            5 => Ok(NcType::Float),
            6 => Ok(NcType::Double),
            weird => Err(CodecError::corrupt(format!("unknown netcdf type {weird}"))),
        }
    }

    const fn size(self) -> usize {
        match self {
            NcType::Byte | NcType::Char => 1,
            NcType::Short => 2,
            NcType::Int | NcType::Float => 4,
            NcType::Double => 8,
        }
    }
}

#[derive(Debug, Clone)]
struct Dimension {
    name: String,
    /// Zero for the record dimension.
    len: u64,
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    dimids: Vec<usize>,
    nc_type: NcType,
    vsize: u64,
    begin: u64,
}

/// A real-valued per-frame variable, located relative to the start of a record.
#[derive(Debug, Clone, Copy)]
struct Field {
    /// Distance from the start of the record.
    offset: u64,
    double: bool,
}

impl Field {
    fn read<R: Read>(&self, file: &mut R, buf: &mut [f32]) -> io::Result<()> {
        for value in buf {
            *value = if self.double {
                read_f64(file)? as f32
            } else {
                read_f32(file)?
            };
        }
        Ok(())
    }
}

/// What frame access needs from the header.
#[derive(Debug, Clone)]
struct Layout {
    natoms: u32,
    /// Number of records according to the header, if the writer has filled it in.
    numrecs: Option<u64>,
    /// Offset of the first record.
    begin: u64,
    /// Size of one record.
    recsize: u64,
    coordinates: Field,
    cell_lengths: Option<Field>,
    time: Option<Field>,
}

fn read_name<R: Read>(file: &mut R) -> Result<String, CodecError> {
    let len = read_u32(file)? as usize;
    if len > MAX_NAME_LEN {
        return Err(CodecError::corrupt(format!("name of {len} bytes")));
    }
    let mut bytes = vec![0; len + padding(len)];
    file.read_exact(&mut bytes)?;
    bytes.truncate(len);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads the tag and element count of a list, treating an absent list as empty.
fn read_list_header<R: Read>(file: &mut R, tag: u32) -> Result<usize, CodecError> {
    let found = read_u32(file)?;
    let nelems = read_u32(file)? as usize;
    match found {
        0 if nelems == 0 => Ok(0),
        found if found == tag => Ok(nelems),
        found => Err(CodecError::corrupt(format!(
            "expected list tag {tag:#x}, found {found:#x}"
        ))),
    }
}

fn skip_attributes<R: Read>(file: &mut R) -> Result<(), CodecError> {
    let nattrs = read_list_header(file, NC_ATTRIBUTE)?;
    for _ in 0..nattrs {
        let _name = read_name(file)?;
        let nc_type = NcType::from_tag(read_u32(file)?)?;
        let nelems = read_u32(file)? as u64;
        let nbytes = nelems * nc_type.size() as u64;
        let nbytes = nbytes + padding(nbytes as usize) as u64;
        let skipped = io::copy(&mut file.by_ref().take(nbytes), &mut io::sink())?;
        if skipped != nbytes {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
    }
    Ok(())
}

impl Layout {
    fn read<R: Read>(file: &mut R) -> Result<Self, CodecError> {
        let mut magic = [0; 4];
        file.read_exact(&mut magic)?;
        let wide_offsets = match magic {
            [b'C', b'D', b'F', 1] => false,
            [b'C', b'D', b'F', 2] => true,
            [b'C', b'D', b'F', version] => {
                return Err(CodecError::unsupported(format!(
                    "netcdf format version {version}"
                )))
            }
            [0x89, b'H', b'D', b'F'] => {
                return Err(CodecError::unsupported("hdf5-based (netcdf-4) files"))
            }
            _ => return Err(CodecError::corrupt("missing 'CDF' tag")),
        };
        let numrecs = match read_u32(file)? {
            STREAMING => None,
            n => Some(n as u64),
        };

        let ndims = read_list_header(file, NC_DIMENSION)?;
        let mut dims = Vec::with_capacity(ndims.min(1024));
        for _ in 0..ndims {
            let name = read_name(file)?;
            let len = read_u32(file)? as u64;
            dims.push(Dimension { name, len });
        }

        skip_attributes(file)?;

        let nvars = read_list_header(file, NC_VARIABLE)?;
        let mut vars = Vec::with_capacity(nvars.min(1024));
        for _ in 0..nvars {
            let name = read_name(file)?;
            let ndims = read_u32(file)? as usize;
            let mut dimids = Vec::with_capacity(ndims.min(16));
            for _ in 0..ndims {
                let dimid = read_u32(file)? as usize;
                if dimid >= dims.len() {
                    return Err(CodecError::corrupt(format!(
                        "variable '{name}' refers to unknown dimension {dimid}"
                    )));
                }
                dimids.push(dimid);
            }
            skip_attributes(file)?;
            let nc_type = NcType::from_tag(read_u32(file)?)?;
            let vsize = read_u32(file)? as u64;
            let begin = if wide_offsets {
                read_u64(file)?
            } else {
                read_u32(file)? as u64
            };
            vars.push(Variable {
                name,
                dimids,
                nc_type,
                vsize,
                begin,
            });
        }

        Self::from_header(numrecs, &dims, &vars)
    }

    fn from_header(
        numrecs: Option<u64>,
        dims: &[Dimension],
        vars: &[Variable],
    ) -> Result<Self, CodecError> {
        let is_record = |var: &Variable| {
            var.dimids
                .first()
                .is_some_and(|&dimid| dims[dimid].len == 0)
        };
        let records: Vec<&Variable> = vars.iter().filter(|&var| is_record(var)).collect();
        let begin = records
            .iter()
            .map(|var| var.begin)
            .min()
            .ok_or_else(|| CodecError::unsupported("files without record variables"))?;
        let recsize: u64 = records.iter().map(|var| var.vsize).sum();
        if recsize == 0 {
            return Err(CodecError::corrupt("record size is zero"));
        }

        let field = |name: &str, shape: &[Option<u64>]| -> Result<Option<Field>, CodecError> {
            let Some(var) = vars.iter().find(|var| var.name == name) else {
                return Ok(None);
            };
            let shape_matches = is_record(var)
                && var.dimids.len() == shape.len() + 1
                && var.dimids[1..]
                    .iter()
                    .zip(shape)
                    .all(|(&dimid, len)| len.map_or(true, |len| dims[dimid].len == len));
            if !shape_matches {
                return Err(CodecError::unsupported(format!(
                    "variable '{name}' does not have the expected shape"
                )));
            }
            let double = match var.nc_type {
                NcType::Float => false,
                NcType::Double => true,
                other => {
                    return Err(CodecError::unsupported(format!(
                        "variable '{name}' of type {other:?}"
                    )))
                }
            };
            Ok(Some(Field {
                offset: var.begin - begin,
                double,
            }))
        };

        let coordinates = field("coordinates", &[None, Some(3)])?
            .ok_or_else(|| CodecError::unsupported("files without a 'coordinates' variable"))?;
        let natoms = vars
            .iter()
            .find(|var| var.name == "coordinates")
            .map(|var| dims[var.dimids[1]].len)
            .unwrap_or_default();
        let natoms = u32::try_from(natoms)
            .map_err(|_| CodecError::corrupt("atom count does not fit in 32 bits"))?;
        let atom_dim = dims
            .iter()
            .find(|dim| dim.name == "atom")
            .map(|dim| dim.len);
        if atom_dim.is_some_and(|len| len != natoms as u64) {
            return Err(CodecError::corrupt(
                "'coordinates' does not run along the 'atom' dimension",
            ));
        }

        Ok(Self {
            natoms,
            numrecs,
            begin,
            recsize,
            coordinates,
            cell_lengths: field("cell_lengths", &[Some(3)])?,
            time: field("time", &[])?,
        })
    }

    /// Number of records that are completely present in a file of `len` bytes.
    fn complete_records(&self, len: u64) -> u64 {
        let on_disk = len.saturating_sub(self.begin) / self.recsize;
        match self.numrecs {
            Some(numrecs) => numrecs.min(on_disk),
            None => on_disk,
        }
    }
}

/// Reader for one NetCDF trajectory.
#[derive(Debug)]
pub struct NetCdfDecoder {
    file: BufReader<File>,
    layout: Layout,
    /// Start of the record the next decode reads.
    record: u64,
}

impl Decoder for NetCdfDecoder {
    const TO_ANGSTROM: f32 = 1.0;

    fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let layout = Layout::read(&mut file)?;
        let record = layout.begin;
        Ok(Self {
            file,
            layout,
            record,
        })
    }

    fn natoms(&self) -> u32 {
        self.layout.natoms
    }

    fn scan(path: &Path) -> Result<OffsetIndex, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let len = file.get_ref().metadata()?.len();
        let layout = Layout::read(&mut file)?;

        let nrecs = layout.complete_records(len);
        let offsets = (0..nrecs).map(|idx| layout.begin + idx * layout.recsize);
        OffsetIndex::from_scan(offsets.collect())
    }

    fn seek(&mut self, offset: u64) -> Result<(), CodecError> {
        if offset < self.layout.begin || (offset - self.layout.begin) % self.layout.recsize != 0 {
            return Err(CodecError::corrupt(format!(
                "offset {offset} is not the start of a record"
            )));
        }
        self.record = offset;
        Ok(())
    }

    fn decode_next(&mut self, frame: &mut Frame) -> Result<Status, CodecError> {
        let len = self.file.get_ref().metadata()?.len();
        if self.record + self.layout.recsize > len {
            return Ok(Status::EndOfStream);
        }
        let layout = &self.layout;
        let file = &mut self.file;

        frame.positions.resize(layout.natoms as usize * 3, 0.0);
        file.seek(SeekFrom::Start(self.record + layout.coordinates.offset))?;
        layout.coordinates.read(file, &mut frame.positions)?;

        frame.boxvec = match &layout.cell_lengths {
            Some(field) => {
                let mut lengths = [0.0; 3];
                file.seek(SeekFrom::Start(self.record + field.offset))?;
                field.read(file, &mut lengths)?;
                BoxVec::from_diagonal(glam::Vec3::from_array(lengths))
            }
            None => BoxVec::ZERO,
        };

        frame.time = match &layout.time {
            Some(field) => {
                let mut time = [0.0];
                file.seek(SeekFrom::Start(self.record + field.offset))?;
                field.read(file, &mut time)?;
                time[0]
            }
            None => 0.0,
        };

        self.record += layout.recsize;
        Ok(Status::Read)
    }
}
