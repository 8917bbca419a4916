//! Big-endian primitives shared by the XDR-based formats (xtc, trr) and classic NetCDF.
use std::io::{self, Read};

use crate::BoxVec;

/// Number of bytes needed to pad `n` up to the next 32-bit boundary.
pub(crate) const fn padding(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

// Big-endian XDR primitives.
pub(crate) fn read_f32<R: Read>(file: &mut R) -> io::Result<f32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(f32::from_be_bytes(buf))
}

pub(crate) fn read_f64<R: Read>(file: &mut R) -> io::Result<f64> {
    let mut buf: [u8; 8] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

pub(crate) fn read_i32<R: Read>(file: &mut R) -> io::Result<i32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(file: &mut R) -> io::Result<u32> {
    let mut buf: [u8; 4] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(file: &mut R) -> io::Result<u64> {
    let mut buf: [u8; 8] = Default::default();
    file.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

pub(crate) fn read_f32s<R: Read>(file: &mut R, buf: &mut [f32]) -> io::Result<()> {
    for value in buf {
        *value = read_f32(file)?
    }
    Ok(())
}

pub(crate) fn read_f64s_as_f32<R: Read>(file: &mut R, buf: &mut [f32]) -> io::Result<()> {
    for value in buf {
        *value = read_f64(file)? as f32
    }
    Ok(())
}

/// Reads the nine box values. Each consecutive triple is one box vector, stored as a column.
pub(crate) fn boxvec_from_rows(rows: [f32; 9]) -> BoxVec {
    let cols = [
        [rows[0], rows[1], rows[2]],
        [rows[3], rows[4], rows[5]],
        [rows[6], rows[7], rows[8]],
    ];
    BoxVec::from_cols_array_2d(&cols)
}

/// Reads an xdr opaque block (a `u32` byte count followed by the padded bytes) into `data`.
pub(crate) fn read_opaque<R: Read>(file: &mut R, data: &mut Vec<u8>) -> io::Result<()> {
    let count = read_u32(file)? as usize;
    data.resize(count + padding(count), 0);
    file.read_exact(data)
}

/// Reads an xdr string of at most `max` bytes, returning its (unpadded) bytes.
pub(crate) fn read_string<R: Read>(file: &mut R, max: usize) -> io::Result<Vec<u8>> {
    let count = read_u32(file)? as usize;
    if count > max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string of {count} bytes exceeds the limit of {max}"),
        ));
    }
    let mut data = vec![0; count + padding(count)];
    file.read_exact(&mut data)?;
    data.truncate(count);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_to_words() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(13), 3);
    }

    #[test]
    fn string_skips_padding() -> io::Result<()> {
        let mut bytes = Vec::new();
        bytes.extend(5u32.to_be_bytes());
        bytes.extend(b"hello\0\0\0");
        bytes.extend(7i32.to_be_bytes());
        let mut reader = bytes.as_slice();
        assert_eq!(read_string(&mut reader, 16)?, b"hello");
        assert_eq!(read_i32(&mut reader)?, 7);
        Ok(())
    }
}
