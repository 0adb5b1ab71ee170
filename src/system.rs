#[cfg(windows)]
extern crate winapi;
use crate::common::{path_key, LookupError};
use fs_err as fs;
use std::collections::HashMap;
#[cfg(windows)]
use std::ffi::OsString;
#[cfg(windows)]
use std::os::windows::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Description of a Windows system
/// If running from within Windows we extract the available information from the environment
/// variables and the Windows API.
/// If running in another OS we can only guess the directories, and can't do anything about the PATH
#[derive(Debug, Clone, PartialEq)]
pub struct WindowsSystem {
    /// Windows directory (typically C:\Windows)
    pub win_dir: PathBuf,
    /// System directory (typically C:\Windows\System32)
    pub sys_dir: PathBuf,
    /// Shared application data root (typically C:\ProgramData)
    pub program_data: PathBuf,
    /// PATH as specified by the system
    pub system_path: Option<Vec<PathBuf>>,
}

impl WindowsSystem {
    /// Collect information about the host operating system
    #[cfg(windows)]
    pub fn current() -> Result<Self, LookupError> {
        let win_dir = get_windows_directory()?;
        let sys_dir = get_system_directory()?;
        let program_data = std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                win_dir
                    .parent()
                    .unwrap_or(&win_dir)
                    .join("ProgramData")
            });
        let system_path = std::env::var_os("PATH").map(|p| {
            std::env::split_paths(&p)
                .filter(|d| !d.as_os_str().is_empty() && d.is_dir())
                .collect()
        });
        Ok(Self {
            win_dir,
            sys_dir,
            program_data,
            system_path,
        })
    }

    /// Collect information about the Windows operating system installed on the partition the target
    /// executable lies into
    #[cfg(not(windows))]
    pub fn from_exe_location<P: AsRef<Path>>(p: P) -> Result<Option<Self>, LookupError> {
        Ok(Self::find_root(&p).and_then(Self::from_root))
    }

    /// Try finding a Windows installation along the path to the target executable
    /// Rationale: the user may have mounted a Windows partition at an unknown depth in the
    /// filesystem
    #[cfg(not(windows))]
    fn find_root<P: AsRef<Path>>(p: P) -> Option<PathBuf> {
        p.as_ref()
            .parent()?
            .ancestors()
            .find(|a| Self::from_root(a).is_some())
            .map(Path::to_owned)
    }

    /// Collect information about the Windows installation at the given path
    /// The path should point to the C:\ partition
    pub fn from_root<P: AsRef<Path>>(root_path: P) -> Option<Self> {
        let win_dir = root_path.as_ref().join("Windows");
        let sys_dir = win_dir.join("System32");
        if sys_dir.is_dir() {
            Some(Self {
                program_data: root_path.as_ref().join("ProgramData"),
                win_dir,
                sys_dir,
                system_path: None,
            })
        } else {
            None
        }
    }

    /// 32-bit system directory
    pub fn wow64_dir(&self) -> PathBuf {
        self.win_dir.join("SysWOW64")
    }

    /// Directories through which the ARM64 loader resolves translated binaries: CHPE x86 system
    /// libraries and ARM32 system libraries
    pub fn translation_dirs(&self) -> [PathBuf; 2] {
        [self.win_dir.join("SyChpe32"), self.win_dir.join("SysArm32")]
    }
}

/// Fetch the path to a system directory through the Windows API
#[cfg(windows)]
fn get_winapi_directory(
    a: unsafe extern "system" fn(
        winapi::um::winnt::LPWSTR,
        winapi::shared::minwindef::UINT,
    ) -> winapi::shared::minwindef::UINT,
) -> Result<PathBuf, std::io::Error> {
    use std::io::Error;

    const BFR_SIZE: usize = 512;
    let mut bfr: [u16; BFR_SIZE] = [0; BFR_SIZE];

    let ret: u32 = unsafe { a(bfr.as_mut_ptr(), BFR_SIZE as u32) };
    if ret == 0 || ret as usize > BFR_SIZE {
        Err(Error::last_os_error())
    } else {
        Ok(PathBuf::from(OsString::from_wide(&bfr[..ret as usize])))
    }
}

/// Get the path to the System directory (typically C:\Windows\System32)
#[cfg(windows)]
fn get_system_directory() -> Result<PathBuf, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetSystemDirectoryW)
}

/// Get the path to the Windows directory (typically C:\Windows)
#[cfg(windows)]
fn get_windows_directory() -> Result<PathBuf, std::io::Error> {
    get_winapi_directory(winapi::um::sysinfoapi::GetWindowsDirectoryW)
}

/// Caches the content of already scanned directories, to avoid repeated expensive filesystem access
///
/// File names are matched case-insensitively, as the Windows loader does. A directory that cannot
/// be read is remembered as empty
#[derive(Debug, Default)]
pub(crate) struct WinFileSystemCache {
    files_in_dirs: HashMap<String, HashMap<String, PathBuf>>,
}

impl WinFileSystemCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn test_file_in_folder_case_insensitive<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        filename: P,
        folder: Q,
    ) -> Option<PathBuf> {
        let folder = folder.as_ref();
        let dir = self.scan_folder(folder);
        dir.get(&path_key(filename)).map(|p| folder.join(p))
    }

    fn scan_folder(&mut self, folder: &Path) -> &HashMap<String, PathBuf> {
        self.files_in_dirs
            .entry(path_key(folder))
            .or_insert_with(|| match fs::read_dir(folder) {
                Ok(entries) => entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.metadata().map_or_else(|_| false, |m| m.is_file()))
                    .map(|entry| {
                        (
                            entry.file_name().to_string_lossy().to_lowercase(),
                            entry.file_name().into(),
                        )
                    })
                    .collect(),
                Err(e) => {
                    log::debug!("skipping unreadable directory: {}", e);
                    HashMap::new()
                }
            })
    }

    #[cfg(test)]
    pub(crate) fn scanned_folders(&self) -> usize {
        self.files_in_dirs.len()
    }
}
