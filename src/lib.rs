extern crate thiserror;

mod runner;

pub mod arch;
pub mod common;
pub mod dependencies;
pub mod executable;
pub mod lookup_path;
pub mod pe;
pub mod query;
pub mod ranges;
pub mod resolver;
pub mod search_path;
pub mod statistics;
pub mod system;
pub mod tool;

pub use arch::{Classification, HostArch, Machine};
pub use common::{
    absolute_path, decanonicalize, path_to_string, readable_canonical_path, LookupError,
};
pub use executable::{BinaryRecord, BinaryRecords};
pub use query::LookupQuery;
pub use runner::Analysis;
pub use statistics::{DepthStatistics, Statistics};
pub use tool::{Dumpbin, MetadataTool};

/// Classify the target of the query and, up to the requested depth, everything it depends on
///
/// Fails only if the inspection tool cannot run or the target does not exist; problems with
/// individual binaries end up in the records of the result
pub fn analyze<T: MetadataTool + ?Sized>(
    query: &LookupQuery,
    tool: &T,
) -> Result<Analysis, LookupError> {
    tool.check_available()?;
    let query = query.absolutized()?;
    if !query.target.target_exe.is_file() {
        return Err(LookupError::PathNotFound(query.target.target_exe));
    }
    runner::Runner::new(&query, tool)?.run()
}
