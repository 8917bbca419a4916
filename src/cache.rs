//! A registry of open trajectories, kept current with the files on disk.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::{debug, info};
use regex::Regex;

use crate::codec::Format;
use crate::collection::{lock, TrajectoryCollection};
use crate::config::Config;
use crate::error::{Error, Result};

/// Extensions a part file may have.
const PART_EXTENSIONS: &str = "xtc|trr";

type Slot = Arc<Mutex<Option<CacheEntry>>>;

#[derive(Debug)]
struct CacheEntry {
    collection: Arc<TrajectoryCollection>,
    parts: BTreeSet<PathBuf>,
    modified: HashMap<PathBuf, SystemTime>,
}

impl CacheEntry {
    fn open(path: &Path, parts: BTreeSet<PathBuf>, config: &Config) -> Result<Self> {
        for part in &parts {
            Format::from_path(part)?;
        }
        // Taken before opening, so that writes during the open show up as stale next time.
        let modified = modification_times(&parts)?;
        let paths: Vec<PathBuf> = parts.iter().cloned().collect();
        let collection = TrajectoryCollection::open_named(path, &paths, config)?;
        debug!(
            "opened {} with {} parts and {} frames",
            path.display(),
            parts.len(),
            collection.frame_count()
        );
        Ok(Self {
            collection: Arc::new(collection),
            parts,
            modified,
        })
    }
}

/// Whether any part has been modified since the `recorded` times.
fn is_stale(
    recorded: &HashMap<PathBuf, SystemTime>,
    current: &HashMap<PathBuf, SystemTime>,
) -> bool {
    current
        .iter()
        .any(|(part, now)| recorded.get(part).map_or(true, |then| then < now))
}

fn modification_times(parts: &BTreeSet<PathBuf>) -> Result<HashMap<PathBuf, SystemTime>> {
    parts
        .iter()
        .map(|part| -> Result<(PathBuf, SystemTime)> {
            let modified = fs::metadata(part)
                .and_then(|meta| meta.modified())
                .map_err(|err| Error::Open {
                    path: part.clone(),
                    source: err.into(),
                })?;
            Ok((part.clone(), modified))
        })
        .collect()
}

/// Open trajectories by path.
///
/// The cache is meant to live as long as the process that reads from it. Entries are never
/// evicted, but they are kept in step with the files they were opened from: frames appended
/// to a part are picked up, and a split trajectory that gained or lost parts is reopened.
///
/// A [`TrajectoryCache`] can be shared between threads. Concurrent requests for the same path
/// wait for each other, so a trajectory is opened only once; requests for different paths
/// proceed independently.
#[derive(Debug, Default)]
pub struct TrajectoryCache {
    config: Config,
    entries: Mutex<HashMap<PathBuf, Slot>>,
}

impl TrajectoryCache {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            entries: Mutex::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the trajectory at `path`, opening it or bringing it up to date as needed.
    ///
    /// A file name that starts with the split marker stands for all of its part files.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<Arc<TrajectoryCollection>> {
        let path = path.as_ref();
        let parts: BTreeSet<PathBuf> = resolve_parts(path, self.config.split_marker)?
            .into_iter()
            .collect();

        let slot = lock(&self.entries)
            .entry(path.to_path_buf())
            .or_default()
            .clone();
        let result = self.refresh(&slot, path, parts);
        if result.is_err() {
            self.forget_empty(path, &slot);
        }
        result
    }

    /// Brings the entry in `slot` up to date, opening it if there is none.
    fn refresh(
        &self,
        slot: &Mutex<Option<CacheEntry>>,
        path: &Path,
        parts: BTreeSet<PathBuf>,
    ) -> Result<Arc<TrajectoryCollection>> {
        let mut slot = lock(slot);

        if let Some(entry) = slot.as_mut() {
            if entry.parts == parts {
                let refreshed = modification_times(&parts).and_then(|modified| {
                    if is_stale(&entry.modified, &modified) {
                        info!("{} was modified, updating its offsets", path.display());
                        entry.collection.update(true)?;
                        entry.modified = modified;
                    }
                    Ok(Arc::clone(&entry.collection))
                });
                if refreshed.is_err() {
                    *slot = None;
                }
                return refreshed;
            }
            info!("parts of {} changed, reopening", path.display());
        }

        *slot = None;
        let entry = CacheEntry::open(path, parts, &self.config)?;
        let collection = Arc::clone(&entry.collection);
        *slot = Some(entry);
        Ok(collection)
    }

    /// Removes the slot of `path` if it holds no entry and nobody else is waiting on it.
    fn forget_empty(&self, path: &Path, slot: &Slot) {
        let mut entries = lock(&self.entries);
        // New references to a slot are only handed out under the `entries` lock, so the map
        // and `slot` are the only two when the count is 2.
        let unused = entries
            .get(path)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unused && lock(slot).is_none() {
            entries.remove(path);
        }
    }

    /// Number of open trajectories.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.entries).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid_pattern(err: regex::Error) -> Error {
    io::Error::new(io::ErrorKind::InvalidInput, err).into()
}

fn list_dir(dir: &Path) -> io::Result<Vec<String>> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        if let Ok(name) = entry?.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Returns the pattern that the part files of the split trajectory `stem` match.
fn part_pattern(stem: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"^{}\.part[0-9]{{4}}\.({PART_EXTENSIONS})$",
        regex::escape(stem)
    ))
}

/// Returns the files that make up the trajectory at `path`, in frame order.
///
/// If the file name of `path` starts with `marker`, the name stands for a split trajectory:
/// `dir/@run.xtc` is made up of the files `dir/run.partNNNN.xtc` (or `.trr`), ordered by
/// their part number. Any other path is a trajectory of its own.
pub fn resolve_parts(path: &Path, marker: char) -> Result<Vec<PathBuf>> {
    let split_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(marker));
    let Some(split_name) = split_name else {
        return Ok(vec![path.to_path_buf()]);
    };

    let stem = Path::new(split_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(split_name);
    let pattern = part_pattern(stem).map_err(invalid_pattern)?;
    let dir = path.parent().unwrap_or(Path::new(""));
    let names = match list_dir(dir) {
        Ok(names) => names,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err.into()),
    };

    let mut parts: Vec<PathBuf> = names
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .map(|name| dir.join(name))
        .collect();
    if parts.is_empty() {
        return Err(Error::NoParts {
            path: path.to_path_buf(),
        });
    }
    // The part numbers have a fixed width, so the lexicographic order is the numeric one.
    parts.sort();
    Ok(parts)
}

/// Lists the split trajectories in `dir` that consist of more than one part.
///
/// The names are returned as `dir/<marker><stem>.<ext>`, ready to be passed to
/// [`TrajectoryCache::get`], in sorted order.
pub fn discover_split_trajectories(dir: impl AsRef<Path>, marker: char) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let pattern = Regex::new(&format!(r"^(.*)\.part[0-9]{{4}}\.({PART_EXTENSIONS})$"))
        .map_err(invalid_pattern)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for name in list_dir(dir)? {
        if let Some(captures) = pattern.captures(&name) {
            let split_name = format!("{marker}{}.{}", &captures[1], &captures[2]);
            *counts.entry(split_name).or_default() += 1;
        }
    }

    Ok(counts
        .into_iter()
        .filter(|&(_, count)| count > 1)
        .map(|(name, _)| dir.join(name))
        .collect())
}
