//! Writers for small synthetic trajectories, and the values they contain.
#![allow(dead_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::ops::Range;
use std::path::Path;
use std::time::{Duration, SystemTime};

use glam::Mat3;

/// Position of `atom` along `dim` in `frame`, in the native unit of the file.
///
/// All values are exact in `f32`.
pub fn position(frame: u64, atom: usize, dim: usize) -> f32 {
    frame as f32 + atom as f32 * 0.25 + dim as f32 * 0.125
}

pub fn time(frame: u64) -> f32 {
    frame as f32 * 2.0
}

/// The box vectors of `frame`, one per row.
pub fn box_rows(frame: u64) -> [[f32; 3]; 3] {
    [
        [3.0 + frame as f32 * 0.5, 0.0, 0.0],
        [0.25, 4.0, 0.0],
        [0.5, 0.75, 5.0],
    ]
}

/// The positions a reader should report for `frame`, after scaling by `scale`.
pub fn expected_positions(frame: u64, natoms: usize, scale: f32) -> Vec<f32> {
    (0..natoms)
        .flat_map(|atom| (0..3).map(move |dim| position(frame, atom, dim)))
        .map(|v| v * scale)
        .collect()
}

/// The unit cell a reader should report for `frame`, after scaling by `scale`.
pub fn expected_box(frame: u64, scale: f32) -> Mat3 {
    Mat3::from_cols_array_2d(&box_rows(frame)) * scale
}

/// The orthorhombic part of [`expected_box`], for formats that only store box lengths.
pub fn expected_box_lengths(frame: u64) -> Mat3 {
    let rows = box_rows(frame);
    Mat3::from_diagonal(glam::Vec3::new(rows[0][0], rows[1][1], rows[2][2]))
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Moves the modification time of `path` `secs` seconds past now.
pub fn touch_ahead(path: impl AsRef<Path>, secs: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend(v.to_be_bytes());
}

fn put_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend(v.to_be_bytes());
}

/// Appends uncompressed xtc frames. Only valid for up to nine atoms.
pub fn write_xtc_small(
    path: impl AsRef<Path>,
    natoms: usize,
    frames: Range<u64>,
) -> io::Result<()> {
    assert!(natoms <= 9, "larger xtc frames are compressed");
    let mut file = append(path.as_ref())?;
    for frame in frames {
        let mut buf = Vec::new();
        put_i32(&mut buf, 1995);
        put_i32(&mut buf, natoms as i32);
        put_i32(&mut buf, frame as i32);
        put_f32(&mut buf, time(frame));
        for v in box_rows(frame).into_iter().flatten() {
            put_f32(&mut buf, v);
        }
        put_i32(&mut buf, natoms as i32);
        for atom in 0..natoms {
            for dim in 0..3 {
                put_f32(&mut buf, position(frame, atom, dim));
            }
        }
        file.write_all(&buf)?;
    }
    Ok(())
}

/// Position written into compressed xtc files. Atoms sit close together, so the run-length
/// path of the compression gets used.
pub fn compressed_position(frame: u64, atom: usize, dim: usize) -> f32 {
    1.0 + frame as f32 * 0.1 + atom as f32 * 0.03 + dim as f32 * 0.01
}

/// Writes a compressed xtc file with an independent writer.
pub fn write_xtc_compressed(path: impl AsRef<Path>, natoms: usize, nframes: u64) {
    use xdrfile::{Frame, Trajectory, XTCTrajectory};

    let mut traj = XTCTrajectory::open_write(path.as_ref()).expect("could not create xtc file");
    for fi in 0..nframes {
        let mut frame = Frame::new();
        frame.step = fi as usize;
        frame.time = time(fi);
        frame.box_vector = box_rows(fi);
        frame.coords.extend(
            (0..natoms).map(|atom| [0, 1, 2].map(|dim| compressed_position(fi, atom, dim))),
        );
        traj.write(&frame).expect("could not write xtc frame");
    }
}

/// Options for [`write_trr`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrrOptions {
    pub double: bool,
    /// Also write velocity and force sections, which readers have to skip.
    pub with_velocities: bool,
    /// Leave out the positions.
    pub without_positions: bool,
}

/// Appends trr frames.
pub fn write_trr(
    path: impl AsRef<Path>,
    natoms: usize,
    frames: Range<u64>,
    options: TrrOptions,
) -> io::Result<()> {
    let real = if options.double { 8 } else { 4 };
    let put_real = |buf: &mut Vec<u8>, v: f32| {
        if options.double {
            buf.extend((v as f64).to_be_bytes());
        } else {
            buf.extend(v.to_be_bytes());
        }
    };
    let vector_size = (natoms * 3 * real) as i32;
    let x_size = if options.without_positions { 0 } else { vector_size };
    let vf_size = if options.with_velocities { vector_size } else { 0 };

    let mut file = append(path.as_ref())?;
    for frame in frames {
        let mut buf = Vec::new();
        put_i32(&mut buf, 1993);
        put_i32(&mut buf, 13);
        put_i32(&mut buf, 12);
        buf.extend(b"GMX_trn_file");
        for size in [0, 0, 9 * real as i32, 0, 0, 0, 0, x_size, vf_size, vf_size] {
            put_i32(&mut buf, size);
        }
        put_i32(&mut buf, natoms as i32);
        put_i32(&mut buf, frame as i32);
        put_i32(&mut buf, 0);
        put_real(&mut buf, time(frame));
        put_real(&mut buf, 0.0);

        for v in box_rows(frame).into_iter().flatten() {
            put_real(&mut buf, v);
        }
        if !options.without_positions {
            for atom in 0..natoms {
                for dim in 0..3 {
                    put_real(&mut buf, position(frame, atom, dim));
                }
            }
        }
        if options.with_velocities {
            for _ in 0..2 * natoms * 3 {
                put_real(&mut buf, -1.0);
            }
        }
        file.write_all(&buf)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

struct DcdWriter {
    endianness: Endianness,
    buf: Vec<u8>,
}

impl DcdWriter {
    fn i32(&mut self, v: i32) {
        match self.endianness {
            Endianness::Little => self.buf.extend(v.to_le_bytes()),
            Endianness::Big => self.buf.extend(v.to_be_bytes()),
        }
    }

    fn f32(&mut self, v: f32) {
        match self.endianness {
            Endianness::Little => self.buf.extend(v.to_le_bytes()),
            Endianness::Big => self.buf.extend(v.to_be_bytes()),
        }
    }

    fn f64(&mut self, v: f64) {
        match self.endianness {
            Endianness::Little => self.buf.extend(v.to_le_bytes()),
            Endianness::Big => self.buf.extend(v.to_be_bytes()),
        }
    }

    fn header(&mut self, natoms: usize, nframes: u64) {
        self.i32(84);
        self.buf.extend(b"CORD");
        let mut icntrl = [0i32; 20];
        icntrl[0] = nframes as i32;
        icntrl[2] = 1;
        icntrl[10] = 1; // Unit cell present.
        icntrl[19] = 24; // CHARMM version.
        for v in icntrl {
            self.i32(v);
        }
        self.i32(84);

        self.i32(4 + 80);
        self.i32(1);
        let mut title = [b' '; 80];
        title[..12].copy_from_slice(b"test written");
        self.buf.extend(title);
        self.i32(4 + 80);

        self.i32(4);
        self.i32(natoms as i32);
        self.i32(4);
    }

    fn frame(&mut self, natoms: usize, frame: u64) {
        let rows = box_rows(frame);
        self.i32(48);
        for v in [rows[0][0], 90.0, rows[1][1], 90.0, 90.0, rows[2][2]] {
            self.f64(v as f64);
        }
        self.i32(48);
        for dim in 0..3 {
            self.i32(natoms as i32 * 4);
            for atom in 0..natoms {
                self.f32(position(frame, atom, dim));
            }
            self.i32(natoms as i32 * 4);
        }
    }
}

/// Writes a CHARMM-style dcd file with a unit cell record in every frame.
pub fn write_dcd(
    path: impl AsRef<Path>,
    natoms: usize,
    nframes: u64,
    endianness: Endianness,
) -> io::Result<()> {
    let mut writer = DcdWriter {
        endianness,
        buf: Vec::new(),
    };
    writer.header(natoms, nframes);
    for frame in 0..nframes {
        writer.frame(natoms, frame);
    }
    std::fs::write(path, writer.buf)
}

/// Appends frames to a dcd file written by [`write_dcd`].
pub fn append_dcd(
    path: impl AsRef<Path>,
    natoms: usize,
    frames: Range<u64>,
    endianness: Endianness,
) -> io::Result<()> {
    let mut writer = DcdWriter {
        endianness,
        buf: Vec::new(),
    };
    for frame in frames {
        writer.frame(natoms, frame);
    }
    append(path.as_ref())?.write_all(&writer.buf)
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.extend((name.len() as u32).to_be_bytes());
    buf.extend(name.as_bytes());
    buf.extend(std::iter::repeat(0).take((4 - name.len() % 4) % 4));
}

fn netcdf_header(natoms: usize, nframes: u64, begin: u32) -> Vec<u8> {
    const NC_DIMENSION: u32 = 0x0A;
    const NC_VARIABLE: u32 = 0x0B;
    const NC_ATTRIBUTE: u32 = 0x0C;
    const NC_CHAR: u32 = 2;
    const NC_FLOAT: u32 = 5;
    const NC_DOUBLE: u32 = 6;

    let mut buf = Vec::new();
    buf.extend(b"CDF\x01");
    buf.extend((nframes as u32).to_be_bytes());

    buf.extend(NC_DIMENSION.to_be_bytes());
    buf.extend(4u32.to_be_bytes());
    for (name, len) in [
        ("frame", 0),
        ("spatial", 3),
        ("atom", natoms as u32),
        ("cell_spatial", 3),
    ] {
        put_name(&mut buf, name);
        buf.extend(len.to_be_bytes());
    }

    buf.extend(NC_ATTRIBUTE.to_be_bytes());
    buf.extend(1u32.to_be_bytes());
    put_name(&mut buf, "Conventions");
    buf.extend(NC_CHAR.to_be_bytes());
    put_name(&mut buf, "AMBER");

    let coordinates_size = natoms as u32 * 3 * 4;
    let vars: [(&str, &[u32], u32, u32, u32); 3] = [
        ("time", &[0], NC_FLOAT, 4, begin),
        ("coordinates", &[0, 2, 1], NC_FLOAT, coordinates_size, begin + 4),
        (
            "cell_lengths",
            &[0, 3],
            NC_DOUBLE,
            24,
            begin + 4 + coordinates_size,
        ),
    ];
    buf.extend(NC_VARIABLE.to_be_bytes());
    buf.extend((vars.len() as u32).to_be_bytes());
    for (name, dimids, nc_type, vsize, begin) in vars {
        put_name(&mut buf, name);
        buf.extend((dimids.len() as u32).to_be_bytes());
        for dimid in dimids {
            buf.extend(dimid.to_be_bytes());
        }
        // No attributes.
        buf.extend(0u32.to_be_bytes());
        buf.extend(0u32.to_be_bytes());
        buf.extend(nc_type.to_be_bytes());
        buf.extend(vsize.to_be_bytes());
        buf.extend(begin.to_be_bytes());
    }
    buf
}

/// Writes a classic NetCDF file following the AMBER trajectory conventions.
pub fn write_netcdf(path: impl AsRef<Path>, natoms: usize, nframes: u64) -> io::Result<()> {
    let begin = netcdf_header(natoms, nframes, 0).len() as u32;
    let mut buf = netcdf_header(natoms, nframes, begin);
    for frame in 0..nframes {
        buf.extend(time(frame).to_be_bytes());
        for atom in 0..natoms {
            for dim in 0..3 {
                buf.extend(position(frame, atom, dim).to_be_bytes());
            }
        }
        let rows = box_rows(frame);
        for v in [rows[0][0], rows[1][1], rows[2][2]] {
            buf.extend((v as f64).to_be_bytes());
        }
    }
    std::fs::write(path, buf)
}
