//! Data structures that must be filled with the input and the parameters for the analysis

use crate::arch::HostArch;
use crate::common::{absolute_path, LookupError};
use crate::system::WindowsSystem;
use fs_err as fs;
use std::path::{Path, PathBuf};

/// Depth used when the caller asks for a recursive analysis without a bound
pub const DEFAULT_MAX_DEPTH: usize = 3;

#[derive(Clone, Debug)]
pub struct LookupTarget {
    /// Path to the target executable
    pub target_exe: PathBuf,
    /// Parent directory of target_exe, cached for performance purposes
    pub app_dir: PathBuf,
    /// Additional executable search path set by the user
    pub user_path: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LookupParameters {
    /// Follow the dependencies of the target at all
    pub recursive: bool,
    /// Maximum library recursion depth for the search (the target has depth 0)
    pub max_depth: usize,
    /// Skip extracting dependencies of DLLs found in system directories
    pub skip_system_dlls: bool,
    /// Also follow the delay-loaded dependencies
    pub include_delay_load: bool,
}

impl LookupParameters {
    /// Depth bound actually applied to the walk
    pub fn effective_max_depth(&self) -> usize {
        if self.recursive {
            self.max_depth
        } else {
            0
        }
    }
}

impl Default for LookupParameters {
    fn default() -> Self {
        Self {
            recursive: false,
            max_depth: DEFAULT_MAX_DEPTH,
            skip_system_dlls: false,
            include_delay_load: false,
        }
    }
}

/// Complete specification of an analysis task
#[derive(Clone, Debug)]
pub struct LookupQuery {
    pub system: Option<WindowsSystem>,
    pub host: HostArch,
    pub target: LookupTarget,
    pub parameters: LookupParameters,
}

impl LookupQuery {
    pub fn new<P: AsRef<Path>>(
        target_exe: P,
        system: Option<WindowsSystem>,
        host: HostArch,
    ) -> Result<Self, LookupError> {
        let target_exe = absolute_path(target_exe)?;
        let app_dir = target_exe.parent().ok_or_else(|| {
            LookupError::ContextDeductionError(format!(
                "Could not find application directory for given executable {}",
                target_exe.display()
            ))
        })?
        .to_owned();
        Ok(Self {
            system,
            host,
            target: LookupTarget {
                target_exe,
                app_dir,
                user_path: Vec::new(),
            },
            parameters: LookupParameters::default(),
        })
    }

    /// autodetects the settings with sensible defaults
    ///
    /// The target must exist; host and Windows system are those of the running machine
    #[cfg(windows)]
    pub fn deduce_from_executable_location<P: AsRef<Path>>(
        target_exe: P,
    ) -> Result<Self, LookupError> {
        let target_exe = Self::existing_target(target_exe.as_ref())?;
        Self::new(target_exe, Some(WindowsSystem::current()?), HostArch::current()?)
    }

    /// autodetects the settings with sensible defaults
    ///
    /// The target must exist; the Windows system is looked for along the path to the target
    #[cfg(not(windows))]
    pub fn deduce_from_executable_location<P: AsRef<Path>>(
        target_exe: P,
    ) -> Result<Self, LookupError> {
        let target_exe = Self::existing_target(target_exe.as_ref())?;
        let system = WindowsSystem::from_exe_location(&target_exe)?;
        Self::new(target_exe, system, HostArch::current()?)
    }

    /// Copy of the query whose target and user paths are all absolute
    pub(crate) fn absolutized(&self) -> Result<Self, LookupError> {
        let mut ret = Self::new(&self.target.target_exe, self.system.clone(), self.host)?;
        ret.target.user_path = self
            .target
            .user_path
            .iter()
            .map(absolute_path)
            .collect::<Result<_, _>>()?;
        ret.parameters = self.parameters.clone();
        Ok(ret)
    }

    fn existing_target(target_exe: &Path) -> Result<PathBuf, LookupError> {
        if !target_exe.is_file() {
            return Err(LookupError::PathNotFound(target_exe.to_owned()));
        }
        Ok(fs::canonicalize(target_exe)?)
    }
}
