//! Mapping of dependency names to files on disk

use crate::lookup_path::{LookupPath, LookupResult};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Prefixes of API set contracts and extension sets: virtual modules the loader redirects to an
/// implementation DLL, with no file of that name to be found
const PSEUDO_MODULE_PREFIXES: [&str; 2] = ["api-ms-", "ext-ms-"];

pub fn is_pseudo_module(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    PSEUDO_MODULE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Outcome of resolving a dependency name
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(LookupResult),
    /// virtual module, never looked up on disk
    PseudoModule,
    /// not found in any directory of the lookup path
    NotFound,
}

/// Names known not to resolve during an analysis
///
/// Both sets only ever grow; an entry is a proven negative for the lifetime of the context
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    unresolved: HashSet<String>,
    pseudo_modules: HashSet<String>,
    unresolved_names: BTreeSet<String>,
    pseudo_module_names: BTreeSet<String>,
}

impl ResolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known_unresolved(&self, name: &str) -> bool {
        self.unresolved.contains(&name.to_lowercase())
    }

    /// Names that could not be found, as first spelled, sorted
    pub fn unresolved_names(&self) -> impl Iterator<Item = &String> {
        self.unresolved_names.iter()
    }

    /// Virtual module names encountered, as first spelled, sorted
    pub fn pseudo_module_names(&self) -> impl Iterator<Item = &String> {
        self.pseudo_module_names.iter()
    }

    fn mark_unresolved(&mut self, name: &str) {
        if self.unresolved.insert(name.to_lowercase()) {
            self.unresolved_names.insert(name.to_owned());
        }
    }

    fn mark_pseudo_module(&mut self, name: &str) {
        if self.pseudo_modules.insert(name.to_lowercase()) {
            self.pseudo_module_names.insert(name.to_owned());
        }
    }
}

/// Find the file a dependency name refers to
///
/// Search order: the directory of the dependent binary, then the lookup path (user paths,
/// application directories, system directories, PATH). Pseudo-modules and names that already
/// failed are answered without touching the filesystem
pub fn resolve(
    name: &str,
    source: &Path,
    lookup_path: &LookupPath,
    context: &mut ResolverContext,
) -> Resolution {
    if is_pseudo_module(name) {
        context.mark_pseudo_module(name);
        return Resolution::PseudoModule;
    }
    if context.is_known_unresolved(name) {
        return Resolution::NotFound;
    }

    match lookup_path.search_file(name, source.parent()) {
        Some(found) => {
            log::debug!(
                "{} => {} ({:?})",
                name,
                found.fullpath.display(),
                found.location
            );
            Resolution::Found(found)
        }
        None => {
            log::warn!(
                "could not find {} (required by {})",
                name,
                source.display()
            );
            context.mark_unresolved(name);
            Resolution::NotFound
        }
    }
}
