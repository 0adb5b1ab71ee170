//! Architecture classification of PE images from the header dump of the inspection tool

use crate::common::LookupError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Processor architecture of the machine the analysis is made for
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub enum HostArch {
    X64,
    Arm64,
}

impl HostArch {
    /// Architecture of the running Windows system
    ///
    /// A 32-bit or emulated process sees the emulated architecture in PROCESSOR_ARCHITECTURE;
    /// PROCESSOR_ARCHITEW6432 carries the real one in that case
    pub fn current() -> Result<Self, LookupError> {
        for var in ["PROCESSOR_ARCHITEW6432", "PROCESSOR_ARCHITECTURE"] {
            if let Ok(value) = std::env::var(var) {
                return value.parse();
            }
        }
        std::env::consts::ARCH.parse()
    }

    /// Machine type whose single-architecture images run natively on this host
    pub fn native_machine(&self) -> Machine {
        match self {
            Self::X64 => Machine::X64,
            Self::Arm64 => Machine::Arm64,
        }
    }
}

impl FromStr for HostArch {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amd64" | "x64" | "x86_64" => Ok(Self::X64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            _ => Err(LookupError::UnsupportedHost(s.to_owned())),
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X64 => write!(f, "x64"),
            Self::Arm64 => write!(f, "ARM64"),
        }
    }
}

/// Machine type field of the COFF file header
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub enum Machine {
    X86,
    X64,
    Arm32,
    Arm64,
    Arm64EC,
    Arm64X,
}

impl Machine {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x014c => Some(Self::X86),
            0x8664 => Some(Self::X64),
            0x01c0 | 0x01c2 | 0x01c4 => Some(Self::Arm32),
            0xaa64 => Some(Self::Arm64),
            0xa641 => Some(Self::Arm64EC),
            0xa64e => Some(Self::Arm64X),
            _ => None,
        }
    }

    fn is_hybrid(&self) -> bool {
        matches!(self, Self::Arm64EC | Self::Arm64X)
    }
}

/// Verdict on how the code of a binary runs on the host
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
pub enum Classification {
    /// single architecture, matching the host
    Native,
    /// single architecture, emulated on the host
    ForeignSingleArch,
    /// code for two architectures in disjoint address ranges
    Hybrid,
    /// the header dump carries no recognizable machine type
    Unknown,
    /// the binary could not be inspected
    Error,
}

impl Classification {
    /// Whether byte counts are meaningful for this classification
    pub fn is_determined(&self) -> bool {
        !matches!(self, Self::Unknown | Self::Error)
    }
}

/// Tokens the machine line of hybrid (ARM64X, ARM64EC, CHPE) images carries after the machine name
const HYBRID_TOKENS: [&str; 3] = ["ARM64X", "ARM64EC", "CHPE"];

static MACHINE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9A-Fa-f]+)\s+machine\s+\(([^)]*)\)").unwrap());

/// The fields of a header dump relevant for classification
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HeaderInfo {
    /// raw machine type code of the first machine line, if any
    pub machine_code: Option<u16>,
    /// a hybrid indicator token appeared on a machine line
    pub hybrid: bool,
}

impl HeaderInfo {
    pub fn parse(dump: &str) -> Result<Self, LookupError> {
        let mut ret = Self {
            machine_code: None,
            hybrid: false,
        };

        for line in dump.lines() {
            if line.contains("fatal error") {
                return Err(LookupError::ParseError(line.trim().to_owned()));
            }
            // paths echoed elsewhere in the dump (file name, PDB) may contain any token
            let Some(caps) = MACHINE_LINE.captures(line) else {
                continue;
            };
            if HYBRID_TOKENS.iter().any(|t| line.contains(t)) {
                ret.hybrid = true;
            }
            if ret.machine_code.is_none() {
                let code = u16::from_str_radix(&caps[1], 16).map_err(|_| {
                    LookupError::ParseError(format!("invalid machine type {}", &caps[1]))
                })?;
                ret.machine_code = Some(code);
            }
        }

        Ok(ret)
    }

    pub fn machine(&self) -> Option<Machine> {
        self.machine_code.and_then(Machine::from_code)
    }

    /// The hybrid signal wins over the legacy machine type hybrid images also report
    pub fn classification(&self, host: HostArch) -> Classification {
        if self.hybrid {
            return Classification::Hybrid;
        }
        match self.machine() {
            Some(m) if m.is_hybrid() => Classification::Hybrid,
            Some(m) if m == host.native_machine() => Classification::Native,
            Some(_) => Classification::ForeignSingleArch,
            None => Classification::Unknown,
        }
    }
}

/// Classify a binary from the text of its header dump
pub fn classify(
    dump: &str,
    host: HostArch,
) -> Result<(Classification, Option<Machine>), LookupError> {
    let info = HeaderInfo::parse(dump)?;
    Ok((info.classification(host), info.machine()))
}
