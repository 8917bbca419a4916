//! Inspect md trajectories, quickly.
use std::io::{self, BufWriter, Write};
use std::num::{NonZeroU64, ParseIntError};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use trajview::{
    discover_split_trajectories, resolve_parts, AtomSelection, Config, Format, FrameSelection,
    OffsetIndex, Range, TrajectoryCache,
};

/// Parses an optional number, where an empty string means "not given".
fn optional<T: std::str::FromStr>(s: Option<&str>) -> Result<Option<T>, T::Err> {
    s.filter(|s| !s.is_empty()).map(str::parse).transpose()
}

fn frame_range_parser(selection: &str) -> Result<FrameSelection, ParseIntError> {
    let mut components = selection.split(':');
    let start = optional(components.next())?;
    let end = optional(components.next())?;
    let step: Option<NonZeroU64> = optional(components.next())?;
    Ok(FrameSelection::Range(Range::new(start, end, step)))
}

fn frame_list_parser(list: &str) -> Result<FrameSelection, ParseIntError> {
    let indices = list
        .split(',')
        .map(|idx| idx.trim().parse())
        .collect::<Result<_, _>>()?;
    Ok(FrameSelection::FrameList(indices))
}

fn atom_selection_parser(selection: &str) -> Result<AtomSelection, String> {
    let mut ranges = Vec::new();
    for component in selection.split(',') {
        let range = match component.split_once(':') {
            Some((start, end)) => {
                let start = optional(Some(start)).map_err(|err| format!("{err}"))?;
                let end: usize = end.parse().map_err(|err| format!("{err}"))?;
                start.unwrap_or(0)..end
            }
            None => {
                let idx: usize = component.parse().map_err(|err| format!("{err}"))?;
                idx..idx + 1
            }
        };
        ranges.push(range);
    }
    Ok(AtomSelection::Ranges(ranges))
}

/// Read frames from xtc, trr, dcd and NetCDF trajectories.
///
/// A file name starting with the split marker (`@` by default) names a trajectory that is
/// split over part files: `md/@run.xtc` reads `md/run.part0001.xtc`, `md/run.part0002.xtc`,
/// and so on, as one trajectory.
#[derive(Parser)]
#[command(version, about, propagate_version = true)]
struct Args {
    /// Suffix appended to a trajectory path to name its offset index file.
    #[arg(long, global = true, default_value = Config::DEFAULT_OFFSETS_SUFFIX)]
    offsets_suffix: String,

    /// Marker that starts the name of a split trajectory.
    #[arg(long, global = true, default_value_t = Config::DEFAULT_SPLIT_MARKER)]
    split_marker: char,

    /// Keep offset indices in memory, without reading or writing index files.
    #[arg(long, global = true)]
    no_persist: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the format, parts, atom count, frame count and unit cell of a trajectory.
    Info { path: PathBuf },

    /// Print a single frame.
    Frame {
        path: PathBuf,
        index: u64,

        /// Atom ranges in the format `start:stop,start:stop`, where a lone `n` is atom `n`.
        ///
        /// - `:100` selects the first 100 atoms.
        ///
        /// - `10:20,0:5` selects atoms 10 up to 20, followed by atoms 0 up to 5.
        #[arg(short, long, value_parser = atom_selection_parser)]
        atoms: Option<AtomSelection>,

        /// Write the binary frame record to standard output instead.
        #[arg(long)]
        raw: bool,
    },

    /// Print the positions of one atom over a number of frames.
    Path {
        path: PathBuf,
        atom: usize,

        /// Comma-separated frame indices, e.g. `2,5,9`.
        #[arg(short, long, value_parser = frame_list_parser, conflicts_with = "range")]
        frames: Option<FrameSelection>,

        /// Frame range in the format `start:stop:step`. Each of these values is optional.
        ///
        /// - `:100:2` selects every second frame from the first 100 frames, 50 in total.
        #[arg(short, long, value_parser = frame_range_parser)]
        range: Option<FrameSelection>,

        /// Write little-endian `f32` triples to standard output instead.
        #[arg(long)]
        raw: bool,
    },

    /// Build the offset index of each part of a trajectory and report its frame count.
    Index {
        path: PathBuf,

        /// Scan the trajectory even if a current index file exists.
        #[arg(long)]
        force: bool,
    },

    /// List the split trajectories in a directory.
    Split { directory: PathBuf },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config {
        offsets_suffix: args.offsets_suffix,
        split_marker: args.split_marker,
        persist_offsets: !args.no_persist,
    };
    match run(args.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: Config) -> trajview::Result<()> {
    let mut stdout = BufWriter::new(io::stdout().lock());
    let cache = TrajectoryCache::new(config);

    match command {
        Command::Info { path } => {
            let trajectory = cache.get(&path)?;
            writeln!(stdout, "path\t{}", trajectory.path().display())?;
            writeln!(stdout, "format\t{}", trajectory.format())?;
            let counts = trajectory.part_frame_counts();
            for (part, count) in trajectory.parts().iter().zip(counts) {
                writeln!(stdout, "part\t{}\t{count} frames", part.display())?;
            }
            writeln!(stdout, "atoms\t{}", trajectory.atom_count())?;
            writeln!(stdout, "frames\t{}", trajectory.frame_count())?;
            let [a, b, c] = trajectory.unit_cell().to_cols_array_2d();
            writeln!(stdout, "box\t{a:?}\t{b:?}\t{c:?}")?;
        }
        Command::Frame {
            path,
            index,
            atoms,
            raw,
        } => {
            let atoms = atoms.unwrap_or_default();
            if raw {
                stdout.write_all(&cache.get_frame_bytes(&path, index, &atoms)?)?;
            } else {
                let frame = cache.get_frame(&path, index, &atoms)?;
                writeln!(stdout, "# frame {} at {:.3} ps", frame.index, frame.time)?;
                let [a, b, c] = frame.boxvec.to_cols_array_2d();
                writeln!(stdout, "# box {a:?} {b:?} {c:?}")?;
                for coord in frame.coords() {
                    writeln!(stdout, "{:.3}\t{:.3}\t{:.3}", coord.x, coord.y, coord.z)?;
                }
            }
        }
        Command::Path {
            path,
            atom,
            frames,
            range,
            raw,
        } => {
            let frames = frames.or(range).unwrap_or_default();
            if raw {
                stdout.write_all(&cache.get_path_bytes(&path, atom, &frames)?)?;
            } else {
                for coord in cache.get_path(&path, atom, &frames)? {
                    writeln!(stdout, "{:.3}\t{:.3}\t{:.3}", coord.x, coord.y, coord.z)?;
                }
            }
        }
        Command::Index { path, force } => {
            let config = cache.config();
            for part in resolve_parts(&path, config.split_marker)? {
                let format = Format::from_path(&part)?;
                let index = if force {
                    OffsetIndex::rebuild(&part, format, config)?
                } else {
                    OffsetIndex::load_or_build(&part, format, config)?
                };
                writeln!(stdout, "{}\t{} frames", part.display(), index.frame_count())?;
            }
        }
        Command::Split { directory } => {
            for name in discover_split_trajectories(&directory, cache.config().split_marker)? {
                writeln!(stdout, "{}", name.display())?;
            }
        }
    }

    stdout.flush()?;
    Ok(())
}
