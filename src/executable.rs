use crate::arch::{Classification, Machine};
use crate::common::path_key;
use crate::ranges::CodeBreakdown;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Analysis result for one binary file reached during the walk
#[derive(Debug, Clone, Serialize)]
pub struct BinaryRecord {
    /// absolute path of the file
    pub path: PathBuf,
    /// file name, as found on disk
    pub name: String,
    pub classification: Classification,
    /// machine type declared in the file header, if recognized
    pub machine: Option<Machine>,
    pub native_bytes: u64,
    pub non_native_bytes: u64,
    /// size of the file on disk
    pub file_size: u64,
    /// depth at which the file was first reached (the root has depth 0)
    pub depth: usize,
    /// resolved from a Windows system directory
    pub is_system: bool,
}

impl BinaryRecord {
    pub fn breakdown(&self) -> CodeBreakdown {
        CodeBreakdown {
            native_bytes: self.native_bytes,
            non_native_bytes: self.non_native_bytes,
        }
    }

    pub fn native_percentage(&self) -> f64 {
        self.breakdown().native_percentage()
    }
}

/// Collection of BinaryRecord objects, one per file (compared case-insensitively)
#[derive(Debug, Clone, Default)]
pub struct BinaryRecords {
    index: HashMap<String, BinaryRecord>,
}

impl BinaryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, keeping the existing record, if the path was already recorded
    pub fn insert(&mut self, record: BinaryRecord) -> bool {
        match self.index.entry(path_key(&record.path)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(record);
                true
            }
        }
    }

    pub fn get<P: AsRef<std::path::Path>>(&self, path: P) -> Option<&BinaryRecord> {
        self.index.get(&path_key(path))
    }

    pub fn contains<P: AsRef<std::path::Path>>(&self, path: P) -> bool {
        self.index.contains_key(&path_key(path))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &BinaryRecord> {
        self.index.values()
    }

    /// Get the root binary (i.e. the only one with depth equal to zero)
    pub fn get_root(&self) -> Option<&BinaryRecord> {
        self.index.values().find(|r| r.depth == 0)
    }

    pub fn sorted_by_path(&self) -> Vec<&BinaryRecord> {
        let mut sorted: Vec<_> = self.index.values().collect();
        sorted.sort_by(|r1, r2| r1.path.cmp(&r2.path));
        sorted
    }

    /// Records grouped by discovery depth, each group sorted by path
    pub fn by_depth(&self) -> BTreeMap<usize, Vec<&BinaryRecord>> {
        let mut ret: BTreeMap<usize, Vec<&BinaryRecord>> = BTreeMap::new();
        for r in self.sorted_by_path() {
            ret.entry(r.depth).or_default().push(r);
        }
        ret
    }
}

impl Serialize for BinaryRecords {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.sorted_by_path())
    }
}
