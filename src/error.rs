use std::path::PathBuf;

use thiserror::Error;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parse error: {0}")]
    XmlParse(#[from] xmltree::ParseError),

    #[error("XML serialize error: {details}")]
    XmlSerialize { details: String },

    #[error("record member matching `{fragment}` not found in archive")]
    RecordNotFound { fragment: String },

    #[error("archive nesting exceeds the depth cap of {max_depth}")]
    NestingTooDeep { max_depth: usize },

    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("not a recognizable atomzip member name: `{name}`")]
    InvalidBagName { name: String },

    #[error("index write error: {0}")]
    Index(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Failures while rewriting a managed record to inline form
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("record has no MODS datastream")]
    DatastreamMissing,

    #[error("datastream version carries no ID attribute")]
    VersionIdMissing,

    #[error("no content found for datastream version `{id}`")]
    ContentMissing { id: String },
}

/// Failures of the external tool bridge
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("generator produced no bag path for `{object}`")]
    NoBagPath { object: String },

    #[error("generator timed out after {timeout_seconds}s for `{object}`")]
    GeneratorTimeout { object: String, timeout_seconds: u64 },

    #[error("generated bag archive is missing: {path}")]
    BagArchiveMissing { path: PathBuf },

    #[error("formatter exited with status {status}: {stderr}")]
    FormatterFailed { status: i32, stderr: String },

    #[error("formatter timed out after {timeout_seconds}s")]
    FormatterTimeout { timeout_seconds: u64 },

    #[error("formatter wrote invalid UTF-8 to stdout")]
    FormatterOutputNotUtf8,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, NormalizeError>;
