extern crate native_runner;

use anyhow::Context;
use clap::Parser;
use fs_err as fs;
use native_runner::common::{decanonicalize, path_to_string, readable_canonical_path};
use native_runner::pe::ensure_pe_image;
use native_runner::query::LookupQuery;
use native_runner::system::WindowsSystem;
use native_runner::{Analysis, Dumpbin, HostArch};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nativerun")]
#[command(version)]
#[command(about = "How much of a Windows program runs natively on this processor?")]
struct Args {
    /// Target file (.exe or .dll)
    input: PathBuf,

    /// Follow the dependencies of the target
    #[arg(short, long)]
    recursive: bool,

    /// Maximum recursion depth
    #[arg(short = 'd', long, default_value_t = native_runner::query::DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Additional directories to search for dependencies (separated by ';')
    #[arg(short = 'a', long = "userpath")]
    user_path: Option<String>,

    /// Windows partition to use for system DLLs lookup (if not specified, the partition where
    /// INPUT lies will be tested and used if valid)
    #[arg(short = 'w', long)]
    windows_root: Option<PathBuf>,

    /// Host architecture to evaluate against (x64, arm64; default: this machine)
    #[arg(long)]
    host: Option<HostArch>,

    /// Do not follow dependencies of DLLs found in system directories
    #[arg(long)]
    skip_system_dlls: bool,

    /// Also follow delay-loaded dependencies
    #[arg(long)]
    include_delay_load: bool,

    /// Path to dumpbin.exe (default: PATH, then Visual Studio installations)
    #[arg(long)]
    dumpbin: Option<PathBuf>,

    /// Path for output in JSON format
    #[arg(short = 'j', long)]
    output_json_path: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn print_analysis(analysis: &Analysis) {
    for (depth, records) in analysis.records.by_depth() {
        println!("Depth {}", depth);
        for r in records {
            println!(
                "{}{} {:?} {:.2}% native ({} of {} bytes)",
                "\t",
                decanonicalize(&path_to_string(&r.path)),
                r.classification,
                r.native_percentage(),
                r.native_bytes,
                r.breakdown().total(),
            );
        }
    }

    let all = &analysis.statistics.overall;
    println!(
        "\n{} binaries on {}: {} native, {} hybrid, {} emulated; {:.2}% of the code runs natively",
        all.binaries,
        analysis.host,
        all.fully_native,
        all.partially_native,
        all.non_native,
        all.native_percentage()
    );

    if !analysis.unresolved.is_empty() {
        println!("\nNot found:");
        for name in &analysis.unresolved {
            println!("\t{}", name);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    ensure_pe_image(&args.input)?;
    let binary_path = fs::canonicalize(&args.input)?;

    let tool = match &args.dumpbin {
        Some(p) => Dumpbin::new(p),
        None => Dumpbin::locate()?,
    };
    log::info!("using {}", tool.exe().display());

    let mut query = LookupQuery::deduce_from_executable_location(&binary_path)?;

    query.parameters.recursive = args.recursive;
    query.parameters.max_depth = args.max_depth;
    query.parameters.skip_system_dlls = args.skip_system_dlls;
    query.parameters.include_delay_load = args.include_delay_load;

    // overrides (must be last)

    if let Some(host) = args.host {
        query.host = host;
    }

    if let Some(overridden_root) = &args.windows_root {
        query.system = WindowsSystem::from_root(overridden_root);
        if query.system.is_none() {
            log::warn!(
                "no Windows installation found at {}; system DLLs will not be resolved",
                overridden_root.display()
            );
        }
    } else if query.system.is_none() {
        log::warn!(
            "Windows partition root not specified, and executable doesn't lie in one; \
             system DLL imports will not be resolved"
        );
    }

    if let Some(user_path) = &args.user_path {
        query.target.user_path.extend(
            user_path
                .split(';')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        );
    }

    log::info!(
        "Analyzing {} for a {} host",
        readable_canonical_path(&binary_path)?,
        query.host
    );

    let analysis = native_runner::analyze(&query, &tool)?;

    print_analysis(&analysis);

    if let Some(json_output_path) = &args.output_json_path {
        let js = serde_json::to_string_pretty(&analysis).context("Error serializing")?;
        fs::write(json_output_path, js)
            .with_context(|| format!("couldn't write to {}", json_output_path.display()))?;
        log::info!("successfully wrote to {}", json_output_path.display());
    }

    Ok(())
}
