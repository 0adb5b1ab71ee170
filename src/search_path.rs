//! Discovery of the application-specific directories searched for dependencies
//!
//! Applications often keep their DLLs in subfolders of the installation directory, or in a
//! per-product folder under ProgramData, and extend their search path at runtime. None of this is
//! visible in the import tables, so these directories are collected up front.

use crate::common::{absolute_path, LookupError};
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Ordered set of directories; the first insertion of a path fixes its position
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchPathSet {
    dirs: Vec<PathBuf>,
    #[serde(skip)]
    seen: HashSet<PathBuf>,
}

impl SearchPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the directory was already present
    pub fn insert<P: AsRef<Path>>(&mut self, dir: P) -> bool {
        let dir = dir.as_ref();
        if self.seen.contains(dir) {
            return false;
        }
        self.seen.insert(dir.to_owned());
        self.dirs.push(dir.to_owned());
        true
    }

    pub fn contains<P: AsRef<Path>>(&self, dir: P) -> bool {
        self.seen.contains(dir.as_ref())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf> {
        self.dirs.iter()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Insert a directory followed by all of its subdirectories, depth-first in name order
    fn insert_recursive(&mut self, dir: &Path) -> Result<(), LookupError> {
        self.insert(dir);
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let mut subdirs: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(|entry| match entry {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("skipping unreadable path {:?}: {}", e.path(), e.error());
                    None
                }
            })
            .filter(|p| p.is_dir())
            .collect();
        subdirs.sort();
        for d in subdirs {
            self.insert(d);
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SearchPathSet {
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.dirs.iter()
    }
}

const PROGRAM_FILES_DIRS: [&str; 3] =
    ["program files", "program files (x86)", "program files (arm)"];

/// Shared data directory of the product an executable belongs to
///
/// An executable installed as `<Program Files>\<Vendor>\<Product>\...` gets
/// `<program_data>\<Vendor>\<Product>`, whether or not that exists
pub fn product_data_dir(target_exe: &Path, program_data: &Path) -> Option<PathBuf> {
    let components: Vec<&OsStr> = target_exe
        .parent()?
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect();
    let pf = components.iter().position(|c| {
        PROGRAM_FILES_DIRS.contains(&c.to_string_lossy().to_lowercase().as_str())
    })?;
    let vendor = components.get(pf + 1)?;
    let product = components.get(pf + 2)?;
    Some(program_data.join(vendor).join(product))
}

/// Build the application search path for a root executable
///
/// Order: existing user-supplied paths, the executable directory and all its subdirectories,
/// then the product data directory (if any) and its subdirectories
pub fn build(
    target_exe: &Path,
    user_paths: &[PathBuf],
    program_data: Option<&Path>,
) -> Result<SearchPathSet, LookupError> {
    let mut ret = SearchPathSet::new();

    for p in user_paths {
        let p = absolute_path(p)?;
        if p.is_dir() {
            ret.insert(p);
        } else {
            log::warn!("skipping non-existing search path entry {}", p.display());
        }
    }

    let target_exe = absolute_path(target_exe)?;
    let app_dir = target_exe.parent().ok_or_else(|| {
        LookupError::ContextDeductionError(format!(
            "Could not find application directory for executable {}",
            target_exe.display()
        ))
    })?;
    ret.insert_recursive(app_dir)?;

    if let Some(data_dir) = program_data.and_then(|pd| product_data_dir(&target_exe, pd)) {
        if data_dir.is_dir() {
            log::debug!("adding product data directory {}", data_dir.display());
            ret.insert_recursive(&data_dir)?;
        }
    }

    Ok(ret)
}
