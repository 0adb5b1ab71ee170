use crate::executable::{BinaryRecord, BinaryRecords};
use crate::ranges::percentage;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate figures over a set of binaries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepthStatistics {
    pub binaries: usize,
    /// native percentage of 100
    pub fully_native: usize,
    /// native percentage strictly between 0 and 100
    pub partially_native: usize,
    /// native percentage of 0, including binaries that could not be analyzed
    pub non_native: usize,
    pub total_size: u64,
    pub native_bytes: u64,
    pub non_native_bytes: u64,
}

impl DepthStatistics {
    fn add(&mut self, r: &BinaryRecord) {
        let pct = r.native_percentage();
        self.binaries += 1;
        if pct >= 100.0 {
            self.fully_native += 1;
        } else if pct > 0.0 {
            self.partially_native += 1;
        } else {
            self.non_native += 1;
        }
        self.total_size = self.total_size.saturating_add(r.file_size);
        self.native_bytes = self.native_bytes.saturating_add(r.native_bytes);
        self.non_native_bytes = self.non_native_bytes.saturating_add(r.non_native_bytes);
    }

    /// Share of the measured bytes that run natively
    pub fn native_percentage(&self) -> f64 {
        percentage(
            self.native_bytes,
            self.native_bytes.saturating_add(self.non_native_bytes),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub per_depth: BTreeMap<usize, DepthStatistics>,
    pub overall: DepthStatistics,
}

impl Statistics {
    pub fn from_records(records: &BinaryRecords) -> Self {
        let mut ret = Self::default();
        for r in records.values() {
            ret.per_depth.entry(r.depth).or_default().add(r);
            ret.overall.add(r);
        }
        ret
    }
}
