use crate::common::absolute_path;
use crate::query::LookupQuery;
use crate::search_path::SearchPathSet;
use crate::system::WinFileSystemCache;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Directory to be searched, and relative metadata
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub enum LookupPathEntry {
    /// Directory of the binary declaring the dependency
    SourceDir(PathBuf),
    /// Additional path entries specified by the user
    UserPath(PathBuf),
    /// Directory discovered around the root executable (subfolders, product data)
    ApplicationDir(PathBuf),
    /// Windows System directory (typically C:\Windows\System32)
    SystemDir(PathBuf),
    /// 32-bit system directory (typically C:\Windows\SysWOW64)
    Wow64Dir(PathBuf),
    /// ARM64 binary translation directories (SyChpe32, SysArm32)
    TranslationDir(PathBuf),
    /// Windows directory (typically C:\Windows)
    WindowsDir(PathBuf),
    /// PATH as specified by the system (value PATH variable in the shell executing the process)
    SystemPath(PathBuf),
}

impl LookupPathEntry {
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Self::SystemDir(_) | Self::Wow64Dir(_) | Self::TranslationDir(_) | Self::WindowsDir(_)
        )
    }

    pub fn get_path(&self) -> &Path {
        match self {
            Self::SourceDir(p)
            | Self::UserPath(p)
            | Self::ApplicationDir(p)
            | Self::SystemDir(p)
            | Self::Wow64Dir(p)
            | Self::TranslationDir(p)
            | Self::WindowsDir(p)
            | Self::SystemPath(p) => p,
        }
    }
}

/// Full location of a DLL found during lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub location: LookupPathEntry,
    pub fullpath: PathBuf,
}

/// Sorted list of directories to be looked up after the directory of the dependent binary
///
/// Built once per analysis from the query and the application search path; a directory appears
/// in the first tier that lists it only
pub struct LookupPath {
    pub entries: Vec<LookupPathEntry>,
    fs_cache: std::cell::RefCell<WinFileSystemCache>,
}

impl LookupPath {
    pub fn new(query: &LookupQuery, app_paths: &SearchPathSet) -> Self {
        let user_paths: HashSet<PathBuf> = query
            .target
            .user_path
            .iter()
            .filter_map(|p| absolute_path(p).ok())
            .collect();
        let app_entries = app_paths.iter().map(|p| {
            if user_paths.contains(p) {
                LookupPathEntry::UserPath(p.clone())
            } else {
                LookupPathEntry::ApplicationDir(p.clone())
            }
        });

        let system_entries = query.system.as_ref().map(|system| {
            let [chpe, arm32] = system.translation_dirs();
            vec![
                LookupPathEntry::SystemDir(system.sys_dir.clone()),
                LookupPathEntry::Wow64Dir(system.wow64_dir()),
                LookupPathEntry::TranslationDir(chpe),
                LookupPathEntry::TranslationDir(arm32),
                LookupPathEntry::WindowsDir(system.win_dir.clone()),
            ]
        });

        let path_entries = query
            .system
            .as_ref()
            .and_then(|s| s.system_path.as_ref())
            .into_iter()
            .flatten()
            .map(|p| LookupPathEntry::SystemPath(p.clone()));

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let entries = app_entries
            .chain(system_entries.into_iter().flatten())
            .chain(path_entries)
            .filter(|e| seen.insert(e.get_path().to_owned()))
            .collect();

        Self {
            entries,
            fs_cache: std::cell::RefCell::new(WinFileSystemCache::new()),
        }
    }

    // linearize the lookup path into a single vector of directories
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|e| e.get_path().to_owned()).collect()
    }

    /// Look for a file by name: first next to the dependent binary, then along the entries
    pub fn search_file(&self, filename: &str, source_dir: Option<&Path>) -> Option<LookupResult> {
        let source_entry = source_dir.map(|d| LookupPathEntry::SourceDir(d.to_owned()));
        source_entry
            .iter()
            .chain(
                self.entries
                    .iter()
                    .filter(|e| Some(e.get_path()) != source_dir),
            )
            .find_map(|e| {
                self.search_file_in_folder(filename, e.get_path())
                    .map(|fullpath| LookupResult {
                        location: e.clone(),
                        fullpath,
                    })
            })
    }

    fn search_file_in_folder<P: AsRef<Path>>(&self, filename: &str, p: P) -> Option<PathBuf> {
        self.fs_cache
            .borrow_mut()
            .test_file_in_folder_case_insensitive(filename, p.as_ref())
    }
}
