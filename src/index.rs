//! Logical names and the batch result index
//!
//! A bag's logical name is the `COLLECTION:PID` pair derived from its
//! atomzip member name. The result index is the only state fed by
//! multiple workers; rows travel over a channel and are appended by a
//! single collector, in completion order, then persisted once as
//! `map.csv` after the batch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;

/// Suffix that marks a container member as an atomzip bag source.
pub const ATOMZIP_SUFFIX: &str = "_foxml_atomzip.zip";

/// The two-part identifier of one bag, split from the member base name on
/// the last separator: `ACME_COLL_obj123_foxml_atomzip.zip` names the
/// collection `ACME_COLL` and the PID `obj123`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalName {
    pub collection: String,
    pub pid: String,
}

impl LogicalName {
    /// Derive the logical name from an atomzip member name (any directory
    /// components are ignored). Returns `None` when the name does not end
    /// in the atomzip suffix or has no separator to split on.
    pub fn from_atomzip(member_name: &str) -> Option<Self> {
        let base_name = member_name.rsplit('/').next()?;
        let stem = base_name.strip_suffix(ATOMZIP_SUFFIX)?;
        let (collection, pid) = stem.rsplit_once('_')?;
        if collection.is_empty() || pid.is_empty() {
            return None;
        }
        Some(Self {
            collection: collection.to_string(),
            pid: pid.to_string(),
        })
    }

    /// `COLLECTION:PID`, the generator's object argument.
    pub fn object_id(&self) -> String {
        format!("{}:{}", self.collection, self.pid)
    }

    /// `COLLECTION_PID`, the bag name used for output directories and the
    /// index.
    pub fn bag_name(&self) -> String {
        format!("{}_{}", self.collection, self.pid)
    }
}

/// One row of the batch index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub bag_name: String,
    pub converted_foxml_path: PathBuf,
}

/// Append-only, insertion-ordered mapping of bag names to output paths.
/// Failed items never appear here.
#[derive(Debug, Default)]
pub struct ResultIndex {
    entries: Vec<IndexEntry>,
}

impl ResultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain a channel of rows into an index. Run as a single collector
    /// task; senders dropping ends the stream.
    pub async fn collect(mut rows: UnboundedReceiver<IndexEntry>) -> Self {
        let mut index = Self::new();
        while let Some(entry) = rows.recv().await {
            index.push(entry);
        }
        index
    }

    /// Persist the index as a two-column CSV with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }
}
