//! Declared dependencies of a binary, read from the dependency listing of the inspection tool

use crate::common::LookupError;
use once_cell::sync::Lazy;
use regex::Regex;

const IMPORTS_MARKER: &str = "Image has the following dependencies:";
const DELAY_LOAD_MARKER: &str = "Image has the following delay load dependencies:";
const SUMMARY_MARKER: &str = "Summary";

static MODULE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s+(\S+\.(?:dll|exe|sys|drv|ocx|cpl|efi))\s*$").unwrap()
});

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ListingState {
    BeforeMarker,
    InSection { captured: usize },
    Done,
}

/// Names of the modules listed in the dependency sections of a dump, in listing order
///
/// A section ends at the summary marker, or at the first blank line once it has yielded at least
/// one name (the tool prints a blank line between the marker and the list)
pub fn parse_dependencies(
    dump: &str,
    include_delay_load: bool,
) -> Result<Vec<String>, LookupError> {
    if let Some(line) = dump.lines().find(|l| l.contains("fatal error")) {
        return Err(LookupError::ParseError(line.trim().to_owned()));
    }

    let mut state = ListingState::BeforeMarker;
    let mut ret: Vec<String> = Vec::new();

    for line in dump.lines() {
        let is_marker = line.contains(IMPORTS_MARKER)
            || (include_delay_load && line.contains(DELAY_LOAD_MARKER));
        if is_marker {
            state = ListingState::InSection { captured: 0 };
            continue;
        }
        if line.trim() == SUMMARY_MARKER {
            state = ListingState::Done;
            continue;
        }

        match state {
            ListingState::BeforeMarker | ListingState::Done => {}
            ListingState::InSection { captured } => {
                if line.trim().is_empty() {
                    if captured > 0 {
                        state = ListingState::Done;
                    }
                } else if let Some(caps) = MODULE_LINE.captures(line) {
                    let name = module_file_name(&caps[1]);
                    if !ret.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                        ret.push(name);
                    }
                    state = ListingState::InSection {
                        captured: captured + 1,
                    };
                }
            }
        }
    }

    Ok(ret)
}

/// Drop any directory component the tool might print
fn module_file_name(s: &str) -> String {
    s.rsplit(['\\', '/']).next().unwrap_or(s).to_owned()
}
