use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;

/// Index of a file within the manifest.
pub type Origin = u64;

/// Per-file point accounting. Out-of-bounds and overflow events are
/// recoverable; they land here, never in an error path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PointStats {
    pub inserts: u64,
    pub out_of_bounds: u64,
    pub overflows: u64,
}

impl PointStats {
    pub fn add(&mut self, other: &PointStats) {
        self.inserts += other.inserts;
        self.out_of_bounds += other.out_of_bounds;
        self.overflows += other.overflows;
    }

    pub fn add_insert(&mut self) {
        self.inserts += 1;
    }

    pub fn add_out_of_bounds(&mut self) {
        self.out_of_bounds += 1;
    }

    pub fn add_overflow(&mut self) {
        self.overflows += 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileStats {
    pub inserts: u64,
    pub omits: u64,
    pub errors: u64,
}

impl FileStats {
    pub fn add(&mut self, other: &FileStats) {
        self.inserts += other.inserts;
        self.omits += other.omits;
        self.errors += other.errors;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    /// Needs insertion.
    Outstanding,
    /// Completed normally; in-bounds points were indexed.
    Inserted,
    /// Not a point cloud file.
    Omitted,
    /// An error occurred during insertion.
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub status: FileStatus,
    /// Header-derived bounds in the output projection, when known before
    /// insertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_points: Option<u64>,
    #[serde(default)]
    pub point_stats: PointStats,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        FileInfo {
            path: path.into(),
            status: FileStatus::Outstanding,
            bounds: None,
            num_points: None,
            point_stats: PointStats::default(),
        }
    }
}

/// Ordered list of input files with their stats. File order assigns each
/// entry its origin id.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    files: Vec<FileInfo>,
    #[serde(default)]
    file_stats: FileStats,
    #[serde(default)]
    point_stats: PointStats,
}

impl Manifest {
    pub fn new(paths: Vec<String>) -> Self {
        Manifest {
            files: paths.into_iter().map(FileInfo::new).collect(),
            file_stats: FileStats::default(),
            point_stats: PointStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.files
    }

    pub fn get(&self, origin: Origin) -> &FileInfo {
        &self.files[origin as usize]
    }

    pub fn get_mut(&mut self, origin: Origin) -> &mut FileInfo {
        &mut self.files[origin as usize]
    }

    pub fn find(&self, path: &str) -> Option<Origin> {
        self.files
            .iter()
            .position(|f| f.path == path)
            .map(|i| i as Origin)
    }

    pub fn set_status(&mut self, origin: Origin, status: FileStatus) {
        match status {
            FileStatus::Inserted => self.file_stats.inserts += 1,
            FileStatus::Omitted => self.file_stats.omits += 1,
            FileStatus::Error => self.file_stats.errors += 1,
            FileStatus::Outstanding => {}
        }
        self.files[origin as usize].status = status;
    }

    pub fn add_stats(&mut self, origin: Origin, stats: &PointStats) {
        self.files[origin as usize].point_stats.add(stats);
        self.point_stats.add(stats);
    }

    /// Count a whole file as out of bounds, from its header alone.
    /// Secondary subset builds skip the aggregate so merged totals count
    /// each file once.
    pub fn add_out_of_bounds(&mut self, origin: Origin, count: u64, primary: bool) {
        self.files[origin as usize].point_stats.out_of_bounds += count;
        if primary {
            self.point_stats.out_of_bounds += count;
        }
    }

    pub fn file_stats(&self) -> &FileStats {
        &self.file_stats
    }

    pub fn point_stats(&self) -> &PointStats {
        &self.point_stats
    }

    /// Concatenate another manifest's files after this one's.
    pub fn append(&mut self, other: Manifest) {
        self.files.extend(other.files);
    }

    /// Union by path, summing stats: the subset-merge combination.
    pub fn merge(&mut self, other: &Manifest) {
        for theirs in &other.files {
            match self.find(&theirs.path) {
                Some(origin) => {
                    let point_stats = theirs.point_stats;
                    let mine = self.get_mut(origin);
                    mine.point_stats.add(&point_stats);
                    if mine.status == FileStatus::Outstanding {
                        mine.status = theirs.status;
                    }
                }
                None => self.files.push(theirs.clone()),
            }
        }
        self.point_stats.add(&other.point_stats);
        self.file_stats.add(&other.file_stats);
    }
}
