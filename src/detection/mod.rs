//! Detection implementation submodule.
//!
//! - `query_version`: `--version` query through the command runner
//! - `parse_version`: regex-based version extraction from CLI output
//! - `matches_major_minor`: the version gate used for binary dependencies

mod parser;
mod version;

pub(crate) use parser::{matches_major_minor, parse_version};
pub(crate) use version::query_version;
