//! Native / non-native byte accounting, including the hybrid code address range table of
//! ARM64X and ARM64EC images

use crate::arch::{Classification, HostArch};
use crate::common::LookupError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const TABLE_MARKER: &str = "Hybrid Code Address Range Table";
const COLUMN_MARKER: &str = "Address Range";

static RANGE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+)\s.*\(\s*([0-9A-Fa-f]+)\s*-\s*([0-9A-Fa-f]+)\s*\)\s*$").unwrap()
});

/// Instruction set of a segment in the hybrid code address range table
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub enum RangeArch {
    Arm64,
    Arm64EC,
    X64,
}

impl RangeArch {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "arm64" => Some(Self::Arm64),
            "arm64ec" => Some(Self::Arm64EC),
            "x64" => Some(Self::X64),
            _ => None,
        }
    }

    /// ARM64EC is ARM64 code, it only follows the x64 calling convention
    pub fn is_native_on(&self, host: HostArch) -> bool {
        match host {
            HostArch::Arm64 => matches!(self, Self::Arm64 | Self::Arm64EC),
            HostArch::X64 => matches!(self, Self::X64),
        }
    }
}

/// Inclusive range of relative virtual addresses
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct AddressRange {
    pub arch: RangeArch,
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    /// None when the range spans the whole 64-bit address space
    pub fn size(&self) -> Option<u64> {
        self.end.checked_sub(self.start)?.checked_add(1)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum TableState {
    BeforeTable,
    BeforeColumns,
    InTable,
    Done,
}

/// Extract the recognized rows of the hybrid code address range table from a load config dump
///
/// Rows are only accepted between the column header and the first blank line after it, so that
/// whatever the tool prints after the table cannot leak into the result
pub fn parse_range_table(dump: &str) -> Result<Vec<AddressRange>, LookupError> {
    let mut state = TableState::BeforeTable;
    let mut ret = Vec::new();

    for line in dump.lines() {
        match state {
            TableState::BeforeTable => {
                if line.contains(TABLE_MARKER) {
                    state = TableState::BeforeColumns;
                }
            }
            TableState::BeforeColumns => {
                if line.contains(COLUMN_MARKER) {
                    state = TableState::InTable;
                }
            }
            TableState::InTable => {
                if line.trim().is_empty() {
                    state = TableState::Done;
                    continue;
                }
                let Some(caps) = RANGE_ROW.captures(line) else {
                    continue;
                };
                let Some(arch) = RangeArch::from_name(&caps[1]) else {
                    log::debug!("ignoring hybrid range of architecture {}", &caps[1]);
                    continue;
                };
                let start = parse_hex(&caps[2])?;
                let end = parse_hex(&caps[3])?;
                let range = AddressRange { arch, start, end };
                if range.size().is_none() {
                    return Err(LookupError::ParseError(format!(
                        "invalid address range {:X} - {:X}",
                        start, end
                    )));
                }
                ret.push(range);
            }
            TableState::Done => break,
        }
    }

    Ok(ret)
}

fn parse_hex(s: &str) -> Result<u64, LookupError> {
    u64::from_str_radix(s, 16)
        .map_err(|e| LookupError::ParseError(format!("invalid address {}: {}", s, e)))
}

/// How many bytes of a binary run natively and how many under emulation
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct CodeBreakdown {
    pub native_bytes: u64,
    pub non_native_bytes: u64,
}

impl CodeBreakdown {
    pub fn total(&self) -> u64 {
        self.native_bytes.saturating_add(self.non_native_bytes)
    }

    /// Rounded to two decimals, 0 when nothing was measured
    pub fn native_percentage(&self) -> f64 {
        percentage(self.native_bytes, self.total())
    }

    /// Byte counts of a hybrid image, summing the table rows per instruction set
    ///
    /// Fails if the rows add up to more than the 64-bit address space
    pub fn from_ranges(ranges: &[AddressRange], host: HostArch) -> Result<Self, LookupError> {
        let mut ret = Self::default();
        for r in ranges {
            let bucket = if r.arch.is_native_on(host) {
                &mut ret.native_bytes
            } else {
                &mut ret.non_native_bytes
            };
            let current = *bucket;
            *bucket = r
                .size()
                .and_then(|size| current.checked_add(size))
                .ok_or_else(|| {
                    LookupError::ParseError(format!(
                        "hybrid code ranges overflow at {:X} - {:X}",
                        r.start, r.end
                    ))
                })?;
        }
        if ret.native_bytes.checked_add(ret.non_native_bytes).is_none() {
            return Err(LookupError::ParseError(
                "hybrid code ranges exceed the address space".to_owned(),
            ));
        }
        Ok(ret)
    }

    /// Byte counts of a single-architecture image, taken as one block of file_size bytes
    ///
    /// Undetermined classifications count neither way
    pub fn single_arch(classification: Classification, file_size: u64) -> Self {
        match classification {
            Classification::Native => Self {
                native_bytes: file_size,
                non_native_bytes: 0,
            },
            Classification::ForeignSingleArch => Self {
                native_bytes: 0,
                non_native_bytes: file_size,
            },
            Classification::Hybrid | Classification::Unknown | Classification::Error => {
                Self::default()
            }
        }
    }
}

pub(crate) fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10000.0).round() / 100.0
}

/// Byte counts of a hybrid image from the text of its load config dump
pub fn analyze_hybrid(
    load_config_dump: &str,
    host: HostArch,
) -> Result<CodeBreakdown, LookupError> {
    let ranges = parse_range_table(load_config_dump)?;
    CodeBreakdown::from_ranges(&ranges, host)
}
