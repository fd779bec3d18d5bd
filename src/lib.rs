//! # inline-foxml Library
//!
//! Concurrent normalization of FOXML records packaged inside nested zip
//! containers: managed MODS datastreams are rewritten to inline form, the
//! result is canonically formatted through an external formatter, and a
//! batch index maps every processed bag to its output file.

pub mod cli;
pub mod discovery;
pub mod error;
pub mod foxml;
pub mod index;
pub mod locator;
pub mod output;
pub mod pipeline;
pub mod tools;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_support;

pub use cli::{Cli, Config, VerbosityLevel};
pub use discovery::ArchiveDiscovery;
pub use error::{NormalizeError, ToolError, TransformError};
pub use foxml::{is_managed, serialize};
pub use index::{IndexEntry, LogicalName, ResultIndex};
pub use locator::{find_member_tree, parse_record_bytes};
pub use output::Output;
pub use pipeline::{
    ArchiveOutcome, BagOutcome, BagStatus, BatchProgress, BatchResults, NormalizeEngine,
    PipelineConfig, ProgressCallback,
};
pub use tools::{BagGenerator, XmlFormatter, extract_bag_path};
pub use transform::managed_to_inline;
