use std::path::{Path, PathBuf};

/// Settings shared by every trajectory opened through a
/// [`TrajectoryCache`](crate::TrajectoryCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Appended to a trajectory path to locate its side-car offset index.
    pub offsets_suffix: String,
    /// A file name starting with this marker names a split trajectory.
    ///
    /// `dir/@run.xtc` stands for `dir/run.part0001.xtc`, `dir/run.part0002.xtc`, and so on.
    pub split_marker: char,
    /// Whether offset indices are read from and written to side-car files.
    ///
    /// When `false`, every open scans the trajectory and keeps the index in memory only.
    pub persist_offsets: bool,
}

impl Config {
    pub const DEFAULT_OFFSETS_SUFFIX: &'static str = ".offsets";
    pub const DEFAULT_SPLIT_MARKER: char = '@';

    /// Returns the side-car index path for a trajectory at `path`.
    pub fn offsets_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(&self.offsets_suffix);
        PathBuf::from(name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offsets_suffix: Self::DEFAULT_OFFSETS_SUFFIX.to_string(),
            split_marker: Self::DEFAULT_SPLIT_MARKER,
            persist_offsets: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_path_appends_suffix() {
        let config = Config::default();
        assert_eq!(
            config.offsets_path(Path::new("/data/run.part0001.xtc")),
            PathBuf::from("/data/run.part0001.xtc.offsets")
        );

        let config = Config {
            offsets_suffix: ".idx".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.offsets_path(Path::new("traj.trr")),
            PathBuf::from("traj.trr.idx")
        );
    }
}
