use crate::arch::{classify, Classification, HostArch};
use crate::common::{path_key, LookupError};
use crate::dependencies::parse_dependencies;
use crate::executable::{BinaryRecord, BinaryRecords};
use crate::lookup_path::LookupPath;
use crate::query::LookupQuery;
use crate::ranges::{analyze_hybrid, CodeBreakdown};
use crate::resolver::{resolve, Resolution, ResolverContext};
use crate::search_path;
use crate::statistics::Statistics;
use crate::tool::MetadataTool;
use fs_err as fs;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Outcome of an analysis
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub host: HostArch,
    pub max_depth: usize,
    /// one record per file, serialized sorted by path
    pub records: BinaryRecords,
    pub statistics: Statistics,
    /// dependency names that could not be found on disk
    pub unresolved: Vec<String>,
    /// virtual modules that were not looked up
    pub pseudo_modules: Vec<String>,
    /// directories searched after the directory of each dependent binary
    pub search_path: Vec<PathBuf>,
}

#[derive(Debug)]
struct Job {
    path: PathBuf,
    is_system: bool,
}

/// Walks the dependency graph of the target breadth-first, one depth level at a time, and
/// classifies every file reached. A file reachable through several paths keeps the depth at
/// which it was first reached
pub(crate) struct Runner<'a, T: MetadataTool + ?Sized> {
    query: &'a LookupQuery,
    tool: &'a T,
    lookup_path: LookupPath,
    context: ResolverContext,
    visited: HashSet<String>,
    records: BinaryRecords,
}

impl<'a, T: MetadataTool + ?Sized> Runner<'a, T> {
    pub(crate) fn new(query: &'a LookupQuery, tool: &'a T) -> Result<Self, LookupError> {
        let app_paths = search_path::build(
            &query.target.target_exe,
            &query.target.user_path,
            query.system.as_ref().map(|s| s.program_data.as_path()),
        )?;
        Ok(Self {
            query,
            tool,
            lookup_path: LookupPath::new(query, &app_paths),
            context: ResolverContext::new(),
            visited: HashSet::new(),
            records: BinaryRecords::new(),
        })
    }

    pub(crate) fn run(mut self) -> Result<Analysis, LookupError> {
        let max_depth = self.query.parameters.effective_max_depth();
        let root = self.query.target.target_exe.clone();
        self.visited.insert(path_key(&root));
        let mut frontier = vec![Job {
            path: root,
            is_system: false,
        }];

        for depth in 0..=max_depth {
            if frontier.is_empty() {
                break;
            }
            log::info!("depth {}: {} binaries", depth, frontier.len());

            let mut next = Vec::new();
            for job in frontier {
                let record = self.analyze_binary(&job, depth);
                log::debug!(
                    "{}: {:?}, {}% native",
                    record.path.display(),
                    record.classification,
                    record.native_percentage()
                );
                self.records.insert(record);

                if depth < max_depth && !(job.is_system && self.query.parameters.skip_system_dlls) {
                    next.extend(self.enqueue_dependencies(&job.path));
                }
            }
            frontier = next;
        }

        let unresolved: Vec<String> = self.context.unresolved_names().cloned().collect();
        if !unresolved.is_empty() {
            log::warn!("{} dependencies could not be resolved", unresolved.len());
        }

        Ok(Analysis {
            host: self.query.host,
            max_depth,
            statistics: Statistics::from_records(&self.records),
            unresolved,
            pseudo_modules: self.context.pseudo_module_names().cloned().collect(),
            search_path: self.lookup_path.search_path(),
            records: self.records,
        })
    }

    /// Resolve the dependencies of a binary, returning the files not visited yet
    fn enqueue_dependencies(&mut self, path: &Path) -> Vec<Job> {
        let names = match self.tool.dependents(path).and_then(|dump| {
            parse_dependencies(&dump, self.query.parameters.include_delay_load)
        }) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("could not list dependencies of {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        let mut ret = Vec::new();
        for name in names {
            if let Resolution::Found(found) =
                resolve(&name, path, &self.lookup_path, &mut self.context)
            {
                if self.visited.insert(path_key(&found.fullpath)) {
                    ret.push(Job {
                        is_system: found.location.is_system(),
                        path: found.fullpath,
                    });
                }
            }
        }
        ret
    }

    /// Classification and byte counts of one file; failures degrade the record, never the walk
    fn analyze_binary(&self, job: &Job, depth: usize) -> BinaryRecord {
        let path = &job.path;
        let host = self.query.host;
        let file_size = fs::metadata(path).map(|m| m.len());

        let classified = match &file_size {
            Ok(_) => self
                .tool
                .headers(path)
                .and_then(|dump| classify(&dump, host)),
            Err(e) => Err(LookupError::ScanError(e.to_string())),
        };
        let (classification, machine) = match classified {
            Ok(c) => c,
            Err(e) => {
                log::warn!("could not classify {}: {}", path.display(), e);
                (Classification::Error, None)
            }
        };
        let file_size = file_size.unwrap_or(0);

        let breakdown = if classification == Classification::Hybrid {
            match self
                .tool
                .load_config(path)
                .and_then(|dump| analyze_hybrid(&dump, host))
            {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("could not read hybrid code ranges of {}: {}", path.display(), e);
                    CodeBreakdown::default()
                }
            }
        } else {
            CodeBreakdown::single_arch(classification, file_size)
        };

        BinaryRecord {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.clone(),
            classification,
            machine,
            native_bytes: breakdown.native_bytes,
            non_native_bytes: breakdown.non_native_bytes,
            file_size,
            depth,
            is_system: job.is_system,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{HostArch, Machine};
    use crate::system::WindowsSystem;
    use crate::tool::canned::{machine_header, CannedTool};

    fn write_binary(dir: &Path, name: &str, size: usize) -> Result<PathBuf, LookupError> {
        fs::create_dir_all(dir)?;
        let p = dir.join(name);
        fs::write(&p, vec![0u8; size])?;
        Ok(p)
    }

    fn query(root: &Path, max_depth: usize) -> Result<LookupQuery, LookupError> {
        let mut q = LookupQuery::new(root, None, HostArch::Arm64)?;
        q.parameters.recursive = true;
        q.parameters.max_depth = max_depth;
        Ok(q)
    }

    const HYBRID_HEADERS: &str = "FILE HEADER VALUES\n            AA64 machine (ARM64) (ARM64X)\n";
    const HALF_AND_HALF: &str = concat!(
        "  Hybrid Code Address Range Table\n\n",
        "              Address Range\n",
        "              ----------------------\n",
        "        arm64 0000000180001000 - 0000000180001FFF (00001000 - 00001FFF)\n",
        "          x64 0000000180002000 - 0000000180002FFF (00002000 - 00002FFF)\n\n",
    );

    #[test]
    fn hybrid_root() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 20000)?;
        let tool = CannedTool::default()
            .with_headers("app.exe", HYBRID_HEADERS.to_owned())
            .with_load_config("app.exe", HALF_AND_HALF.to_owned())
            .with_dependents("app.exe", &[]);

        let analysis = Runner::new(&query(&root, 0)?, &tool)?.run()?;
        let r = analysis.records.get(&root).unwrap();
        assert_eq!(r.classification, Classification::Hybrid);
        assert_eq!(r.machine, Some(Machine::Arm64));
        assert_eq!((r.native_bytes, r.non_native_bytes), (4096, 4096));
        assert_eq!(r.native_percentage(), 50.0);
        assert!(r.native_bytes + r.non_native_bytes <= r.file_size);
        Ok(())
    }

    #[test]
    fn foreign_root() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 1234)?;
        let tool = CannedTool::default().x64("app.exe", &[]);

        let analysis = Runner::new(&query(&root, 0)?, &tool)?.run()?;
        let r = analysis.records.get(&root).unwrap();
        assert_eq!(r.classification, Classification::ForeignSingleArch);
        assert_eq!(r.native_percentage(), 0.0);
        assert_eq!(r.non_native_bytes, 1234);
        assert_eq!(r.native_bytes, 0);
        Ok(())
    }

    #[test]
    fn pseudo_modules_are_skipped() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        write_binary(tmp.path(), "real.dll", 200)?;
        let tool = CannedTool::default()
            .arm64("app.exe", &["api-ms-win-core-1.dll", "real.dll"])
            .arm64("real.dll", &[]);

        let analysis = Runner::new(&query(&root, 1)?, &tool)?.run()?;
        let view = analysis.records.by_depth();
        assert_eq!(view[&1].len(), 1);
        assert_eq!(view[&1][0].path, tmp.path().join("real.dll"));
        assert_eq!(analysis.pseudo_modules, vec!["api-ms-win-core-1.dll"]);
        assert!(analysis.unresolved.is_empty());
        // real.dll is at the depth bound: its dependencies are not listed
        assert_eq!(tool.dependents_calls.borrow().len(), 1);
        Ok(())
    }

    #[test]
    fn first_seen_depth_wins() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        write_binary(tmp.path(), "a.dll", 100)?;
        write_binary(tmp.path(), "shared.dll", 100)?;
        write_binary(tmp.path(), "leaf.dll", 100)?;
        let tool = CannedTool::default()
            .arm64("app.exe", &["a.dll", "shared.dll"])
            .arm64("a.dll", &["SHARED.DLL", "leaf.dll", "app.exe"])
            .arm64("shared.dll", &["a.dll"])
            .arm64("leaf.dll", &[]);

        let analysis = Runner::new(&query(&root, 5)?, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 4);
        assert_eq!(analysis.records.get(tmp.path().join("shared.dll")).unwrap().depth, 1);
        assert_eq!(analysis.records.get(tmp.path().join("leaf.dll")).unwrap().depth, 2);
        assert_eq!(analysis.records.get(&root).unwrap().depth, 0);
        assert_eq!(analysis.statistics.per_depth[&1].binaries, 2);
        assert_eq!(analysis.statistics.overall.fully_native, 4);
        Ok(())
    }

    #[test]
    fn depth_zero_lists_nothing() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        write_binary(tmp.path(), "real.dll", 100)?;
        let tool = CannedTool::default()
            .arm64("app.exe", &["real.dll"])
            .arm64("real.dll", &[]);

        let analysis = Runner::new(&query(&root, 0)?, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.records.get_root().unwrap().path, root);
        assert!(tool.dependents_calls.borrow().is_empty());

        // not recursive: same as depth 0
        let mut q = query(&root, 4)?;
        q.parameters.recursive = false;
        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.max_depth, 0);
        Ok(())
    }

    #[test]
    fn depth_bound() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        let mut tool = CannedTool::default().arm64("app.exe", &["d1.dll"]);
        for i in 1..6 {
            let name = format!("d{}.dll", i);
            let dep = format!("d{}.dll", i + 1);
            write_binary(tmp.path(), &name, 100)?;
            tool = tool.arm64(&name, &[dep.as_str()]);
        }

        let analysis = Runner::new(&query(&root, 3)?, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 4);
        assert!(analysis.records.values().all(|r| r.depth <= 3));
        assert!(analysis.unresolved.is_empty());
        Ok(())
    }

    #[test]
    fn failures_degrade_records() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        write_binary(tmp.path(), "opaque.dll", 300)?;
        write_binary(tmp.path(), "odd.dll", 400)?;
        write_binary(tmp.path(), "hybrid.dll", 500)?;
        let tool = CannedTool::default()
            .arm64(
                "app.exe",
                &["opaque.dll", "odd.dll", "hybrid.dll", "missing.dll", "Missing.dll"],
            )
            // no canned dumps for opaque.dll: the tool fails on it
            .with_headers("odd.dll", machine_header("200", "IA64"))
            .with_dependents("odd.dll", &[])
            .with_headers("hybrid.dll", HYBRID_HEADERS.to_owned())
            .with_dependents("hybrid.dll", &[]);

        let analysis = Runner::new(&query(&root, 2)?, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 4);

        let opaque = analysis.records.get(tmp.path().join("opaque.dll")).unwrap();
        assert_eq!(opaque.classification, Classification::Error);
        assert_eq!(opaque.file_size, 300);

        let odd = analysis.records.get(tmp.path().join("odd.dll")).unwrap();
        assert_eq!(odd.classification, Classification::Unknown);

        // no load config dump: still hybrid, nothing measured
        let hybrid = analysis.records.get(tmp.path().join("hybrid.dll")).unwrap();
        assert_eq!(hybrid.classification, Classification::Hybrid);

        for r in [opaque, odd, hybrid] {
            assert_eq!((r.native_bytes, r.non_native_bytes), (0, 0));
            assert_eq!(r.native_percentage(), 0.0);
        }
        assert_eq!(analysis.unresolved, vec!["missing.dll"]);
        Ok(())
    }

    #[test]
    fn dependencies_in_subfolders() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        let plugin_dir = tmp.path().join("plugins");
        write_binary(&plugin_dir, "plugin.dll", 100)?;
        write_binary(&plugin_dir, "helper.dll", 100)?;
        let tool = CannedTool::default()
            .arm64("app.exe", &["plugin.dll"])
            .x64("plugin.dll", &["helper.dll"])
            .arm64("helper.dll", &[]);

        let analysis = Runner::new(&query(&root, 2)?, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 3);
        assert_eq!(analysis.statistics.overall.non_native, 1);
        assert_eq!(analysis.statistics.overall.native_percentage(), 66.67);
        assert!(analysis.search_path.contains(&plugin_dir));
        Ok(())
    }

    /// Windows installation under `root`, with `tools` as the only PATH entry
    fn windows_under(root: &Path, tools: &Path) -> Result<WindowsSystem, LookupError> {
        fs::create_dir_all(root.join("Windows/System32"))?;
        fs::create_dir_all(tools)?;
        let mut system = WindowsSystem::from_root(root).unwrap();
        system.system_path = Some(vec![tools.to_owned()]);
        Ok(system)
    }

    #[test]
    fn system_tiers_precede_path() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(&tmp.path().join("app"), "app.exe", 100)?;
        let tools = tmp.path().join("tools");
        let win = tmp.path().join("Windows");
        let mut q = query(&root, 1)?;
        q.system = Some(windows_under(tmp.path(), &tools)?);

        write_binary(&win.join("SysWOW64"), "wow.dll", 10)?;
        write_binary(&win.join("SyChpe32"), "wow.dll", 10)?;
        write_binary(&win.join("SyChpe32"), "chpe.dll", 10)?;
        write_binary(&win.join("SysArm32"), "arm32.dll", 10)?;
        for name in ["wow.dll", "chpe.dll", "arm32.dll", "onpath.dll"] {
            write_binary(&tools, name, 10)?;
        }
        let names = ["wow.dll", "chpe.dll", "arm32.dll", "onpath.dll"];
        let mut tool = CannedTool::default().arm64("app.exe", &names);
        for name in names {
            tool = tool.x64(name, &[]);
        }

        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 5);
        let found = |p: PathBuf| analysis.records.get(p).unwrap();
        assert!(found(win.join("SysWOW64/wow.dll")).is_system);
        assert!(found(win.join("SyChpe32/chpe.dll")).is_system);
        assert!(found(win.join("SysArm32/arm32.dll")).is_system);
        assert!(!found(tools.join("onpath.dll")).is_system);
        assert!(!analysis.records.contains(tools.join("wow.dll")));
        Ok(())
    }

    #[test]
    fn system_dlls_can_be_left_unexplored() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(&tmp.path().join("app"), "app.exe", 100)?;
        let system32 = tmp.path().join("Windows/System32");
        let mut q = query(&root, 3)?;
        q.system = Some(windows_under(tmp.path(), &tmp.path().join("tools"))?);
        write_binary(&system32, "kernel.dll", 100)?;
        write_binary(&system32, "ntcore.dll", 100)?;
        let tool = CannedTool::default()
            .arm64("app.exe", &["KERNEL.dll"])
            .arm64("kernel.dll", &["ntcore.dll"])
            .arm64("ntcore.dll", &[]);

        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 3);
        let kernel = analysis.records.get(system32.join("kernel.dll")).unwrap();
        assert!(kernel.is_system);
        assert_eq!(kernel.depth, 1);
        assert_eq!(analysis.records.get(system32.join("ntcore.dll")).unwrap().depth, 2);

        q.parameters.skip_system_dlls = true;
        let tool = CannedTool::default()
            .arm64("app.exe", &["KERNEL.dll"])
            .arm64("kernel.dll", &["ntcore.dll"])
            .arm64("ntcore.dll", &[]);
        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 2);
        assert!(analysis.records.get(system32.join("kernel.dll")).unwrap().is_system);
        assert!(!analysis.records.contains(system32.join("ntcore.dll")));
        assert_eq!(*tool.dependents_calls.borrow(), vec![root.clone()]);
        Ok(())
    }

    #[test]
    fn delay_loaded_dependencies_are_opt_in() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        write_binary(tmp.path(), "eager.dll", 100)?;
        write_binary(tmp.path(), "lazy.dll", 100)?;
        let tool = CannedTool::default()
            .with_headers("app.exe", machine_header("AA64", "ARM64"))
            .with_delay_loaded("app.exe", &["eager.dll"], &["lazy.dll"])
            .arm64("eager.dll", &[])
            .arm64("lazy.dll", &[]);

        let mut q = query(&root, 1)?;
        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 2);
        assert!(!analysis.records.contains(tmp.path().join("lazy.dll")));

        q.parameters.include_delay_load = true;
        let analysis = Runner::new(&q, &tool)?.run()?;
        assert_eq!(analysis.records.len(), 3);
        assert_eq!(analysis.records.get(tmp.path().join("lazy.dll")).unwrap().depth, 1);
        Ok(())
    }

    #[test]
    fn oversized_range_table_degrades_the_record() -> Result<(), LookupError> {
        let tmp = tempfile::tempdir()?;
        let root = write_binary(tmp.path(), "app.exe", 100)?;
        let table = concat!(
            "Hybrid Code Address Range Table\n",
            "Address Range\n",
            "  x64 0 - 0 (0000000000000000 - FFFFFFFFFFFFFFFF)\n",
        );
        let tool = CannedTool::default()
            .with_headers("app.exe", HYBRID_HEADERS.to_owned())
            .with_load_config("app.exe", table.to_owned())
            .with_dependents("app.exe", &[]);

        let analysis = Runner::new(&query(&root, 0)?, &tool)?.run()?;
        let r = analysis.records.get(&root).unwrap();
        assert_eq!(r.classification, Classification::Hybrid);
        assert_eq!((r.native_bytes, r.non_native_bytes), (0, 0));
        Ok(())
    }
}
