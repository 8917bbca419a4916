//! Format decoders behind one narrow capability interface.
//!
//! The frame-access layer never looks at file contents itself. It only opens a decoder, asks it
//! for the atom count, has it scan for frame offsets, and then seeks and decodes single frames.
use std::fmt;
use std::path::Path;

use crate::error::{CodecError, Error};
use crate::offsets::OffsetIndex;
use crate::Frame;

pub mod dcd;
pub mod netcdf;
pub mod trr;
pub(crate) mod xdr;
pub mod xtc;

use dcd::DcdDecoder;
use netcdf::NetCdfDecoder;
use trr::TrrDecoder;
use xtc::XtcDecoder;

/// Outcome of a successful [`Decoder::decode_next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A frame was decoded.
    Read,
    /// The reader sat at the end of the data; the frame was left untouched.
    EndOfStream,
}

/// The capabilities a trajectory format must provide.
///
/// Dropping a decoder releases its file handle.
pub trait Decoder: Sized {
    /// Factor that converts the native length unit of the format into angstrom.
    const TO_ANGSTROM: f32;

    /// Opens the file at `path` and reads enough of it to know the atom count.
    fn open(path: &Path) -> Result<Self, CodecError>;

    /// The number of atoms in each frame.
    fn natoms(&self) -> u32;

    /// Determines the byte offset of every complete frame in the file at `path`, in one pass.
    fn scan(path: &Path) -> Result<OffsetIndex, CodecError>;

    /// Moves the reader to the start of the frame at byte `offset`.
    fn seek(&mut self, offset: u64) -> Result<(), CodecError>;

    /// Decodes the frame at the reader position into `frame` and advances past it.
    ///
    /// Positions and box are left in the native unit of the format.
    fn decode_next(&mut self, frame: &mut Frame) -> Result<Status, CodecError>;
}

/// A supported trajectory format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Xtc,
    Trr,
    Dcd,
    NetCdf,
}

impl Format {
    /// Lower-case file extensions and the formats they select.
    pub const EXTENSIONS: [(&'static str, Format); 5] = [
        ("xtc", Format::Xtc),
        ("trr", Format::Trr),
        ("nc", Format::NetCdf),
        ("netcdf", Format::NetCdf),
        ("dcd", Format::Dcd),
    ];

    /// Looks up the format for an extension, ignoring case.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        Self::EXTENSIONS
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|&(_, format)| format)
    }

    /// Selects the format from the extension of `path`.
    ///
    /// There is no sniffing of file contents: an unknown extension is an error.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_extension(&extension).ok_or_else(|| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        })
    }

    pub const fn to_angstrom(self) -> f32 {
        match self {
            Format::Xtc => XtcDecoder::TO_ANGSTROM,
            Format::Trr => TrrDecoder::TO_ANGSTROM,
            Format::Dcd => DcdDecoder::TO_ANGSTROM,
            Format::NetCdf => NetCdfDecoder::TO_ANGSTROM,
        }
    }

    /// Whether finding frame offsets means reading through the whole file.
    ///
    /// Only these formats keep a side-car index. The others derive their offsets from the
    /// header and the file length.
    pub const fn needs_scan(self) -> bool {
        match self {
            Format::Xtc | Format::Trr => true,
            Format::Dcd | Format::NetCdf => false,
        }
    }

    pub fn open(self, path: &Path) -> Result<Codec, CodecError> {
        Ok(match self {
            Format::Xtc => Codec::Xtc(XtcDecoder::open(path)?),
            Format::Trr => Codec::Trr(TrrDecoder::open(path)?),
            Format::Dcd => Codec::Dcd(DcdDecoder::open(path)?),
            Format::NetCdf => Codec::NetCdf(NetCdfDecoder::open(path)?),
        })
    }

    pub fn scan(self, path: &Path) -> Result<OffsetIndex, CodecError> {
        match self {
            Format::Xtc => XtcDecoder::scan(path),
            Format::Trr => TrrDecoder::scan(path),
            Format::Dcd => DcdDecoder::scan(path),
            Format::NetCdf => NetCdfDecoder::scan(path),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Xtc => "xtc",
            Format::Trr => "trr",
            Format::Dcd => "dcd",
            Format::NetCdf => "netcdf",
        };
        write!(f, "{name}")
    }
}

/// An open decoder for one of the supported formats.
#[derive(Debug)]
pub enum Codec {
    Xtc(XtcDecoder),
    Trr(TrrDecoder),
    Dcd(DcdDecoder),
    NetCdf(NetCdfDecoder),
}

macro_rules! dispatch {
    ($codec:expr, $decoder:ident => $body:expr) => {
        match $codec {
            Codec::Xtc($decoder) => $body,
            Codec::Trr($decoder) => $body,
            Codec::Dcd($decoder) => $body,
            Codec::NetCdf($decoder) => $body,
        }
    };
}

impl Codec {
    pub fn format(&self) -> Format {
        match self {
            Codec::Xtc(_) => Format::Xtc,
            Codec::Trr(_) => Format::Trr,
            Codec::Dcd(_) => Format::Dcd,
            Codec::NetCdf(_) => Format::NetCdf,
        }
    }

    pub fn natoms(&self) -> u32 {
        dispatch!(self, decoder => decoder.natoms())
    }

    pub fn seek(&mut self, offset: u64) -> Result<(), CodecError> {
        dispatch!(self, decoder => decoder.seek(offset))
    }

    pub fn decode_next(&mut self, frame: &mut Frame) -> Result<Status, CodecError> {
        dispatch!(self, decoder => decoder.decode_next(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_ignore_case() {
        assert_eq!(Format::from_extension("xtc"), Some(Format::Xtc));
        assert_eq!(Format::from_extension("XTC"), Some(Format::Xtc));
        assert_eq!(Format::from_extension("Trr"), Some(Format::Trr));
        assert_eq!(Format::from_extension("nc"), Some(Format::NetCdf));
        assert_eq!(Format::from_extension("NetCDF"), Some(Format::NetCdf));
        assert_eq!(Format::from_extension("dcd"), Some(Format::Dcd));
        assert_eq!(Format::from_extension("pdb"), None);
        assert_eq!(Format::from_extension(""), None);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = Format::from_path(Path::new("/data/run.gro")).unwrap_err();
        match err {
            Error::UnsupportedFormat { extension, .. } => assert_eq!(extension, "gro"),
            other => panic!("unexpected error {other}"),
        }
        assert!(matches!(
            Format::from_path(Path::new("no_extension")),
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}
