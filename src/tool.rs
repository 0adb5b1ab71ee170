//! The external binary inspection tool, treated as a black box producing text dumps

use crate::common::{path_to_string, LookupError};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Produces the raw metadata dumps the classifiers and parsers work on
pub trait MetadataTool {
    /// Name used in log and error messages
    fn name(&self) -> &str;

    /// Fail if the tool cannot be run at all
    fn check_available(&self) -> Result<(), LookupError>;

    /// File and optional header dump (machine type, hybrid indicators)
    fn headers(&self, path: &Path) -> Result<String, LookupError>;

    /// Load configuration dump (hybrid code address range table)
    fn load_config(&self, path: &Path) -> Result<String, LookupError>;

    /// Dependency listing (imported and delay-loaded modules)
    fn dependents(&self, path: &Path) -> Result<String, LookupError>;
}

const DUMPBIN_EXE: &str = "dumpbin.exe";

/// The COFF/PE dumper shipped with the Visual Studio C++ build tools
#[derive(Debug, Clone)]
pub struct Dumpbin {
    exe: PathBuf,
}

impl Dumpbin {
    pub fn new<P: AsRef<Path>>(exe: P) -> Self {
        Self {
            exe: exe.as_ref().to_owned(),
        }
    }

    /// Look for dumpbin on the PATH first, then in the Visual Studio installations
    pub fn locate() -> Result<Self, LookupError> {
        if let Some(exe) = Self::find_on_path() {
            return Ok(Self::new(exe));
        }
        if let Some(exe) = Self::find_in_visual_studio()? {
            return Ok(Self::new(exe));
        }
        Err(LookupError::ToolUnavailable(format!(
            "{} not found on the PATH or in a Visual Studio installation",
            DUMPBIN_EXE
        )))
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    fn find_on_path() -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|d| d.join(DUMPBIN_EXE))
            .find(|p| p.is_file())
    }

    fn find_in_visual_studio() -> Result<Option<PathBuf>, LookupError> {
        let roots: Vec<String> = ["ProgramFiles", "ProgramFiles(x86)"]
            .iter()
            .filter_map(|v| std::env::var(v).ok())
            .collect();
        for root in roots {
            let pattern = format!(
                "{}/Microsoft Visual Studio/*/*/VC/Tools/MSVC/*/bin/Host*/*/{}",
                glob::Pattern::escape(&root),
                DUMPBIN_EXE
            );
            // sorted, so the last entry belongs to the newest toolset
            if let Some(found) = glob::glob(&pattern)?.filter_map(Result::ok).last() {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn run(&self, option: &str, path: &Path) -> Result<String, LookupError> {
        let failed = |message: String| LookupError::ToolFailed {
            tool: self.name().to_owned(),
            path: path.to_owned(),
            message,
        };
        let output = Command::new(&self.exe)
            .arg("/nologo")
            .arg(option)
            .arg(path)
            .output()
            .map_err(|e| failed(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // dumpbin reports its errors on stdout
            let message = stdout
                .lines()
                .chain(stderr.lines())
                .find(|l| l.contains("error"))
                .map(|l| l.trim().to_owned())
                .unwrap_or_else(|| format!("exit status {}", output.status));
            return Err(failed(message));
        }
        Ok(stdout)
    }
}

impl MetadataTool for Dumpbin {
    fn name(&self) -> &str {
        "dumpbin"
    }

    fn check_available(&self) -> Result<(), LookupError> {
        if !self.exe.is_file() {
            return Err(LookupError::ToolUnavailable(path_to_string(&self.exe)));
        }
        Command::new(&self.exe)
            .arg("/nologo")
            .output()
            .map(|_| ())
            .map_err(|e| {
                LookupError::ToolUnavailable(format!("{}: {}", path_to_string(&self.exe), e))
            })
    }

    fn headers(&self, path: &Path) -> Result<String, LookupError> {
        self.run("/headers", path)
    }

    fn load_config(&self, path: &Path) -> Result<String, LookupError> {
        self.run("/loadconfig", path)
    }

    fn dependents(&self, path: &Path) -> Result<String, LookupError> {
        self.run("/dependents", path)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_unavailable() {
        let tool = Dumpbin::new("/definitely/not/here/dumpbin.exe");
        match tool.check_available() {
            Err(e) => assert!(e.is_fatal()),
            Ok(()) => panic!("a missing dumpbin must not be available"),
        }
    }

    #[test]
    fn failing_run_is_per_file_error() {
        let tool = Dumpbin::new("/definitely/not/here/dumpbin.exe");
        let res = tool.headers(Path::new("some.dll"));
        assert!(matches!(res, Err(LookupError::ToolFailed { .. })));
    }
}
