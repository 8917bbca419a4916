//! The compressed GROMACS xtc format.
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::xdr::{boxvec_from_rows, padding, read_f32, read_f32s, read_i32, read_opaque, read_u32};
use super::{Decoder, Status};
use crate::error::CodecError;
use crate::offsets::OffsetIndex;
use crate::{BoxVec, Frame};

/// Integer magnitudes indexed by the compression level of a small-integer run.
#[rustfmt::skip]
pub const MAGICINTS: [i32; 73] = [
    0,        0,        0,       0,       0,       0,       0,       0,       0,       8,
    10,       12,       16,      20,      25,      32,      40,      50,      64,      80,
    101,      128,      161,     203,     256,     322,     406,     512,     645,     812,
    1024,     1290,     1625,    2048,    2580,    3250,    4096,    5060,    6501,    8192,
    10321,    13003,    16384,   20642,   26007,   32768,   41285,   52015,   65536,   82570,
    104031,   131072,   165140,  208063,  262144,  330280,  416127,  524287,  660561,  832255,
    1048576,  1321122,  1664510, 2097152, 2642245, 3329021, 4194304, 5284491, 6658042, 8388607,
    10568983, 13316085, 16777216
];
pub const FIRSTIDX: usize = 9; // Note that MAGICINTS[FIRSTIDX-1] == 0.

/// The header that starts every xtc frame.
#[derive(Debug, Clone)]
struct Header {
    natoms: usize,
    time: f32,
    boxvec: BoxVec,
}

/// Reader for one xtc file.
#[derive(Debug)]
pub struct XtcDecoder {
    file: BufReader<File>,
    natoms: u32,
    /// Compressed bytes of the frame being decoded, kept around between frames.
    scratch: Vec<u8>,
}

impl XtcDecoder {
    pub const MAGIC: i32 = 1995;
    /// Size of a frame header up to and including the repeated atom count.
    const NBYTES_HEADER: u64 = 56;
    /// Size of a compressed frame up to and including the compressed byte count.
    const NBYTES_COMPRESSED_HEADER: u64 = 92;

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
        let natoms = read_i32(file)?;
        let _step = read_i32(file)?;
        let time = read_f32(file)?;
        let mut rows = [0.0; 9];
        read_f32s(file, &mut rows)?;
        let natoms_repeated = read_i32(file)?;
        if natoms != natoms_repeated {
            return Err(CodecError::corrupt(format!(
                "atom counts in frame header disagree ({natoms} and {natoms_repeated})"
            )));
        }
        let natoms = usize::try_from(natoms)
            .map_err(|_| CodecError::corrupt(format!("negative atom count {natoms}")))?;

        Ok(Some(Header {
            natoms,
            time,
            boxvec: boxvec_from_rows(rows),
        }))
    }
}

impl Decoder for XtcDecoder {
    const TO_ANGSTROM: f32 = 10.0;

    fn open(path: &Path) -> Result<Self, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let header = Self::read_header(&mut file)?.ok_or_else(|| {
            CodecError::corrupt("file holds no frame to read the atom count from")
        })?;
        let natoms = u32::try_from(header.natoms)
            .map_err(|_| CodecError::corrupt("atom count does not fit in 32 bits"))?;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            natoms,
            scratch: Vec::new(),
        })
    }

    fn natoms(&self) -> u32 {
        self.natoms
    }

    /// Walks the frame headers and skips over the compressed payloads.
    ///
    /// A trailing frame that does not fit in the file is taken to be still in the process of
    /// being written, and is left out.
    fn scan(path: &Path) -> Result<OffsetIndex, CodecError> {
        let mut file = BufReader::new(File::open(path)?);
        let len = file.get_ref().metadata()?.len();

        let mut offsets = Vec::new();
        let mut offset = 0;
        while offset + Self::NBYTES_HEADER <= len {
            match read_i32(&mut file)? {
                Self::MAGIC => {}
                weird => {
                    return Err(CodecError::Magic {
                        found: weird,
                        expected: Self::MAGIC,
                    })
                }
            }
            let natoms = read_i32(&mut file)?;
            let natoms = u64::try_from(natoms)
                .map_err(|_| CodecError::corrupt(format!("negative atom count {natoms}")))?;

            let (size, consumed) = if natoms <= 9 {
                (Self::NBYTES_HEADER + natoms * 12, 8)
            } else {
                if offset + Self::NBYTES_COMPRESSED_HEADER > len {
                    break;
                }
                file.seek_relative(Self::NBYTES_COMPRESSED_HEADER as i64 - 12)?;
                let count = read_u32(&mut file)? as usize;
                let size = Self::NBYTES_COMPRESSED_HEADER + (count + padding(count)) as u64;
                (size, Self::NBYTES_COMPRESSED_HEADER)
            };
            if offset + size > len {
                break;
            }

            offsets.push(offset);
            file.seek_relative((size - consumed) as i64)?;
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

        frame.time = header.time;
        frame.boxvec = header.boxvec;
        frame.positions.resize(header.natoms * 3, 0.0);
        if header.natoms <= 9 {
            // In case the number of atoms is very small, the positions are stored uncompressed.
            read_f32s(file, &mut frame.positions)?;
        } else {
            let precision = read_f32(file)?;
            read_compressed_positions(file, &mut frame.positions, precision, &mut self.scratch)?;
        }

        Ok(Status::Read)
    }
}

/// Bit-level cursor over the compressed data of one frame.
///
/// Reading past the end of the data does not panic. It yields zeros and marks the reader as
/// overrun, which the caller turns into an error once the frame is done.
struct BitReader<'b> {
    buf: &'b [u8],
    count: usize,
    lastbits: usize,
    lastbyte: u8,
    overrun: bool,
}

impl<'b> BitReader<'b> {
    fn new(buf: &'b [u8]) -> Self {
        Self {
            buf,
            count: 0,
            lastbits: 0,
            lastbyte: 0,
            overrun: false,
        }
    }

    #[inline]
    fn next_byte(&mut self) -> u32 {
        match self.buf.get(self.count) {
            Some(&byte) => {
                self.count += 1;
                byte as u32
            }
            None => {
                self.overrun = true;
                0
            }
        }
    }

    fn decodebits(&mut self, mut nbits: usize) -> u32 {
        // A string of ones that is nbits long.
        let mask: u32 = if nbits >= 32 {
            u32::MAX
        } else {
            (1 << nbits) - 1
        };

        let mut lastbits = self.lastbits;
        let mut lastbyte = self.lastbyte as u32;

        let mut num = 0;
        while nbits >= 8 {
            lastbyte = (lastbyte << 8) | self.next_byte();
            num |= (lastbyte >> lastbits) << (nbits - 8);
            nbits -= 8;
        }

        if nbits > 0 {
            if lastbits < nbits {
                lastbits += 8;
                lastbyte = (lastbyte << 8) | self.next_byte();
            }
            lastbits -= nbits;
            num |= (lastbyte >> lastbits) & mask;
        }

        self.lastbits = lastbits;
        self.lastbyte = (lastbyte & 0xff) as u8; // We don't care about anything but the last byte.
        num & mask
    }

    fn decodeints(&mut self, mut nbits: u32, sizes: [u32; 3], nums: &mut [i32; 3]) {
        if nbits <= 32 {
            self.unpack_from_int_into_u32(nbits, sizes, nums);
            return;
        }
        if nbits <= 64 {
            self.unpack_from_int_into_u64(nbits, sizes, nums);
            return;
        }

        let mut bytes = [0u8; 32];
        let mut nbytes: usize = 0;
        while nbits >= 8 && nbytes < bytes.len() {
            bytes[nbytes] = self.decodebits(8) as u8;
            nbytes += 1;
            nbits -= 8;
        }
        if nbits > 0 && nbytes < bytes.len() {
            bytes[nbytes] = self.decodebits(nbits as usize) as u8;
            nbytes += 1;
        }

        for i in (1..3).rev() {
            let mut num: u32 = 0;
            for k in (0..nbytes).rev() {
                num = (num << 8) | bytes[k] as u32;
                let p = num / sizes[i];
                bytes[k] = p as u8;
                num -= p * sizes[i];
            }
            nums[i] = num as i32;
        }

        nums[0] = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    fn unpack_from_int_into_u32(&mut self, mut nbits: u32, sizes: [u32; 3], nums: &mut [i32; 3]) {
        let mut v: u32 = 0;
        let mut nbytes: u32 = 0;
        while nbits >= 8 {
            v |= self.decodebits(8) << (8 * nbytes);
            nbytes += 1;
            nbits -= 8;
        }
        if nbits > 0 {
            v |= self.decodebits(nbits as usize) << (8 * nbytes);
        }

        let sz = sizes[2];
        let sy = sizes[1];
        let szy = sz * sy;
        let x1 = v / szy;
        let q1 = v - x1 * szy;
        let y1 = q1 / sz;
        let z1 = q1 - y1 * sz;

        *nums = [x1, y1, z1].map(|v| v as i32);
    }

    fn unpack_from_int_into_u64(&mut self, mut nbits: u32, sizes: [u32; 3], nums: &mut [i32; 3]) {
        let mut v: u64 = 0;
        let mut nbytes: u32 = 0;
        while nbits >= 8 {
            v |= (self.decodebits(8) as u64) << (8 * nbytes);
            nbytes += 1;
            nbits -= 8;
        }
        if nbits > 0 {
            v |= (self.decodebits(nbits as usize) as u64) << (8 * nbytes);
        }

        let sz = sizes[2] as u64;
        let sy = sizes[1] as u64;
        let szy = sz * sy;
        let x1 = v / szy;
        let q1 = v - x1 * szy;
        let y1 = q1 / sz;
        let z1 = q1 - y1 * sz;

        *nums = [x1, y1, z1].map(|v| v as i32);
    }
}

/// Writes the position of atom `idx` and reports whether it fit in `positions`.
#[inline]
fn write_position(positions: &mut [f32], idx: usize, coord: [i32; 3], invprecision: f32) -> bool {
    match positions.get_mut(idx * 3..idx * 3 + 3) {
        Some(position) => {
            for (p, c) in position.iter_mut().zip(coord) {
                *p = c as f32 * invprecision;
            }
            true
        }
        None => false,
    }
}

pub(crate) fn read_compressed_positions<R: Read>(
    file: &mut R,
    positions: &mut [f32],
    precision: f32,
    scratch: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let natoms = positions.len() / 3;
    let invprecision = precision.recip();

    let mut minint = [0; 3];
    let mut maxint = [0; 3];
    for v in &mut minint {
        *v = read_i32(file)?;
    }
    for v in &mut maxint {
        *v = read_i32(file)?;
    }
    let mut smallidx = read_u32(file)? as usize;
    if !(FIRSTIDX..MAGICINTS.len()).contains(&smallidx) {
        return Err(CodecError::corrupt(format!("invalid small index {smallidx}")));
    }

    let mut sizeint = [0u32; 3];
    let mut bitsizeint = [0u32; 3];
    let bitsize = calc_sizeint(minint, maxint, &mut sizeint, &mut bitsizeint)?;

    let tmpidx = usize::max(FIRSTIDX, smallidx - 1);
    let mut smaller = MAGICINTS[tmpidx] / 2;
    let mut smallnum = MAGICINTS[smallidx] / 2;
    let mut sizesmall = [MAGICINTS[smallidx] as u32; 3];

    read_opaque(file, scratch)?;
    let mut bits = BitReader::new(scratch);

    let mut run: i32 = 0;
    let mut write_idx = 0;
    let mut read_idx = 0;
    while read_idx < natoms {
        let mut coord = [0i32; 3];
        if bitsize == 0 {
            coord[0] = bits.decodebits(bitsizeint[0] as usize) as i32;
            coord[1] = bits.decodebits(bitsizeint[1] as usize) as i32;
            coord[2] = bits.decodebits(bitsizeint[2] as usize) as i32;
        } else {
            bits.decodeints(bitsize, sizeint, &mut coord);
        }

        for (c, m) in coord.iter_mut().zip(minint) {
            *c = c.wrapping_add(m);
        }
        let mut prevcoord = coord;

        let flag = bits.decodebits(1) > 0;
        let mut is_smaller = 0;
        if flag {
            run = bits.decodebits(5) as i32;
            is_smaller = run % 3;
            run -= is_smaller;
            is_smaller -= 1;
        }
        if run > 0 {
            for k in (0..run).step_by(3) {
                bits.decodeints(smallidx as u32, sizesmall, &mut coord);
                read_idx += 1;
                for (c, p) in coord.iter_mut().zip(prevcoord) {
                    *c = c.wrapping_add(p.wrapping_sub(smallnum));
                }
                if k == 0 {
                    // Swap the first and second atom. This is done to achieve better compression
                    // for water atoms. Waters are stored as OHH, but right now we want to swap the
                    // atoms such that e.g., water will become HOH again.
                    std::mem::swap(&mut coord, &mut prevcoord);
                    if !write_position(positions, write_idx, prevcoord, invprecision) {
                        break;
                    }
                    write_idx += 1;
                } else {
                    prevcoord = coord;
                }
                if !write_position(positions, write_idx, coord, invprecision) {
                    break;
                }
                write_idx += 1;
            }
        } else if write_position(positions, write_idx, coord, invprecision) {
            write_idx += 1;
        }

        match is_smaller.cmp(&0) {
            std::cmp::Ordering::Less => {
                smallidx -= 1;
                smallnum = smaller;
                if smallidx > FIRSTIDX {
                    smaller = MAGICINTS[smallidx - 1] / 2;
                } else {
                    smaller = 0;
                }
            }
            std::cmp::Ordering::Greater => {
                smallidx += 1;
                if smallidx >= MAGICINTS.len() {
                    return Err(CodecError::corrupt("small index ran past the magic table"));
                }
                smaller = smallnum;
                smallnum = MAGICINTS[smallidx] / 2;
            }
            std::cmp::Ordering::Equal => {}
        }

        if MAGICINTS[smallidx] == 0 {
            return Err(CodecError::corrupt("found an invalid size"));
        }
        sizesmall.fill(MAGICINTS[smallidx] as u32);
        read_idx += 1;
    }

    if bits.overrun {
        return Err(CodecError::corrupt(
            "compressed positions ended before all atoms were decoded",
        ));
    }
    if write_idx < natoms {
        return Err(CodecError::corrupt(format!(
            "decoded {write_idx} positions, expected {natoms}"
        )));
    }

    Ok(())
}

fn calc_sizeint(
    minint: [i32; 3],
    maxint: [i32; 3],
    sizeint: &mut [u32; 3],
    bitsizeint: &mut [u32; 3],
) -> Result<u32, CodecError> {
    for i in 0..3 {
        let size = maxint[i] as i64 - minint[i] as i64 + 1;
        sizeint[i] = u32::try_from(size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| CodecError::corrupt("coordinate bounds are inverted"))?;
    }

    bitsizeint.fill(0);

    // Check if one of the sizes is too big to be multiplied.
    if (sizeint[0] | sizeint[1] | sizeint[2]) > 0xffffff {
        bitsizeint[0] = sizeofint(sizeint[0]);
        bitsizeint[1] = sizeofint(sizeint[1]);
        bitsizeint[2] = sizeofint(sizeint[2]);
        return Ok(0); // This flags the use of large sizes.
    }

    Ok(sizeofints(*sizeint))
}

#[inline]
const fn sizeofint(size: u32) -> u32 {
    let mut n: u64 = 1;
    let mut nbits = 0;

    while size as u64 >= n && nbits < 32 {
        nbits += 1;
        n <<= 1;
    }

    nbits
}

fn sizeofints(sizes: [u32; 3]) -> u32 {
    let mut nbytes = 1;
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    let mut nbits = 0;

    for size in sizes {
        let mut tmp: u64 = 0;
        let mut bytecount = 0;
        while bytecount < nbytes {
            tmp += bytes[bytecount] as u64 * size as u64;
            bytes[bytecount] = (tmp & 0xff) as u8;
            tmp >>= 8;
            bytecount += 1;
        }
        while tmp != 0 {
            bytes[bytecount] = (tmp & 0xff) as u8;
            bytecount += 1;
            tmp >>= 8;
        }
        nbytes = bytecount;
    }

    nbytes -= 1;
    let mut num = 1;
    while bytes[nbytes] as u32 >= num {
        nbits += 1;
        num *= 2;
    }

    nbytes as u32 * 8 + nbits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(sizeofint(1), 1);
        assert_eq!(sizeofint(255), 8);
        assert_eq!(sizeofint(256), 9);
        assert_eq!(sizeofints([2, 2, 2]), 4);
        assert_eq!(sizeofints([256, 256, 256]), 25);
    }

    #[test]
    fn bits_within_a_byte() {
        let buf = [0b1010_0000];
        let mut bits = BitReader::new(&buf);
        assert_eq!(bits.decodebits(1), 1);
        assert_eq!(bits.decodebits(1), 0);
        assert_eq!(bits.decodebits(2), 0b10);
        assert!(!bits.overrun);
    }

    #[test]
    fn bits_across_bytes() {
        let buf = [0x12, 0x34];
        let mut bits = BitReader::new(&buf);
        assert_eq!(bits.decodebits(4), 0x1);
        assert_eq!(bits.decodebits(8), 0x23);
        assert_eq!(bits.decodebits(4), 0x4);
        assert!(!bits.overrun);
    }

    #[test]
    fn reading_past_the_end_is_flagged() {
        let buf = [0xff];
        let mut bits = BitReader::new(&buf);
        assert_eq!(bits.decodebits(8), 0xff);
        assert!(!bits.overrun);
        assert_eq!(bits.decodebits(8), 0);
        assert!(bits.overrun);
    }

    #[test]
    fn inverted_bounds_are_corrupt() {
        let mut sizeint = [0; 3];
        let mut bitsizeint = [0; 3];
        let result = calc_sizeint([10, 0, 0], [0, 5, 5], &mut sizeint, &mut bitsizeint);
        assert!(matches!(result, Err(CodecError::Corrupt(_))));
    }
}
