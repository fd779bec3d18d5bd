//! Batch orchestrator
//!
//! Hybrid async/sync pipeline in the same shape as the rest of the crate's
//! concurrency model:
//! - **Async I/O**: subprocess bridges, output-file writes, progress
//! - **Sync CPU/blocking work**: zip reads and tree rewrites, moved onto
//!   blocking threads (the archive handle travels in and out of each
//!   closure so one task owns it for the archive's whole lifetime)
//! - **Bounded concurrency**: one task per input archive, gated by a
//!   semaphore sized to the configured worker count
//! - **Result collection**: completed bags send index rows over a channel
//!   drained by a single collector task
//!
//! Items are independent: a bag failure is logged inline and skipped, an
//! archive failure skips that archive, and neither aborts the batch.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task;
use xmltree::Element;
use zip::ZipArchive;

use crate::cli::Config;
use crate::error::{NormalizeError, Result, ToolError};
use crate::foxml::{self, RECORD_FILENAME};
use crate::index::{ATOMZIP_SUFFIX, IndexEntry, LogicalName, ResultIndex};
use crate::locator;
use crate::output::Output;
use crate::tools::{
    BagGenerator, DEFAULT_FORMATTER_COMMAND, DEFAULT_FORMATTER_TIMEOUT, DEFAULT_GENERATOR_COMMAND,
    DEFAULT_GENERATOR_TIMEOUT, XmlFormatter,
};
use crate::transform;

/// The open input container owned by one archive task.
type Container = ZipArchive<BufReader<File>>;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Number of concurrent archive workers
    pub max_concurrent_archives: usize,
    /// Formatter invocation and bounded wait
    pub formatter_command: Vec<String>,
    pub formatter_timeout: Duration,
    /// Generator invocation and bounded wait
    pub generator_command: Vec<String>,
    pub generator_timeout: Duration,
    /// Cap on container nesting depth
    pub max_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_archives: num_cpus::get(),
            formatter_command: DEFAULT_FORMATTER_COMMAND
                .iter()
                .map(|s| s.to_string())
                .collect(),
            formatter_timeout: DEFAULT_FORMATTER_TIMEOUT,
            generator_command: DEFAULT_GENERATOR_COMMAND
                .iter()
                .map(|s| s.to_string())
                .collect(),
            generator_timeout: DEFAULT_GENERATOR_TIMEOUT,
            max_depth: locator::DEFAULT_MAX_DEPTH,
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_archives: config.threads,
            formatter_command: config.formatter_command.clone(),
            formatter_timeout: config.formatter_timeout,
            generator_command: config.generator_command.clone(),
            generator_timeout: config.generator_timeout,
            max_depth: config.max_depth,
        }
    }
}

/// Final state of one bag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BagStatus {
    /// Managed record rewritten to inline form
    Inlined,
    /// Record was already inline; only reformatted
    AlreadyInline,
    /// Processing failed at some step; the bag is absent from the index
    Failed { message: String },
}

impl BagStatus {
    pub fn is_inlined(&self) -> bool {
        matches!(self, BagStatus::Inlined)
    }

    pub fn is_already_inline(&self) -> bool {
        matches!(self, BagStatus::AlreadyInline)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BagStatus::Failed { .. })
    }
}

/// Result of processing a single bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagOutcome {
    pub bag_name: String,
    pub status: BagStatus,
    /// Path of the formatted record; `None` for failed bags
    pub output_path: Option<PathBuf>,
    pub duration: Duration,
}

impl BagOutcome {
    pub fn completed(
        bag_name: String,
        inlined: bool,
        output_path: PathBuf,
        duration: Duration,
    ) -> Self {
        Self {
            bag_name,
            status: if inlined {
                BagStatus::Inlined
            } else {
                BagStatus::AlreadyInline
            },
            output_path: Some(output_path),
            duration,
        }
    }

    pub fn failed(bag_name: String, error: &NormalizeError, duration: Duration) -> Self {
        Self {
            bag_name,
            status: BagStatus::Failed {
                message: error.to_string(),
            },
            output_path: None,
            duration,
        }
    }
}

/// Result of processing one input archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub archive: PathBuf,
    pub bags: Vec<BagOutcome>,
    /// Archive-level failure (unreadable container), before any bag ran
    pub error: Option<String>,
}

/// Progress update, advanced once per completed archive (success or
/// failure alike); advisory only.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub current_archive: Option<PathBuf>,
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Aggregated results of one batch
#[derive(Debug)]
pub struct BatchResults {
    pub total_archives: usize,
    pub failed_archives: usize,
    pub total_bags: usize,
    pub inlined_bags: usize,
    pub already_inline_bags: usize,
    pub failed_bags: usize,
    pub total_duration: Duration,
    pub archive_outcomes: Vec<ArchiveOutcome>,
    /// Mapping of successful bags to their output files, in completion
    /// order
    pub index: ResultIndex,
}

impl BatchResults {
    pub fn aggregate(
        archive_outcomes: Vec<ArchiveOutcome>,
        index: ResultIndex,
        total_duration: Duration,
    ) -> Self {
        let mut failed_archives = 0;
        let mut total_bags = 0;
        let mut inlined_bags = 0;
        let mut already_inline_bags = 0;
        let mut failed_bags = 0;

        for outcome in &archive_outcomes {
            if outcome.error.is_some() {
                failed_archives += 1;
            }
            for bag in &outcome.bags {
                total_bags += 1;
                match bag.status {
                    BagStatus::Inlined => inlined_bags += 1,
                    BagStatus::AlreadyInline => already_inline_bags += 1,
                    BagStatus::Failed { .. } => failed_bags += 1,
                }
            }
        }

        Self {
            total_archives: archive_outcomes.len(),
            failed_archives,
            total_bags,
            inlined_bags,
            already_inline_bags,
            failed_bags,
            total_duration,
            archive_outcomes,
            index,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed_archives > 0 || self.failed_bags > 0
    }
}

/// Batch engine: one bounded task per input archive, each walking its
/// bags through locate → classify → (transform | skip) → format → record.
pub struct NormalizeEngine {
    generator: Arc<BagGenerator>,
    formatter: Arc<XmlFormatter>,
    output: Arc<Output>,
    config: PipelineConfig,
}

impl NormalizeEngine {
    pub fn new(config: PipelineConfig, output: Arc<Output>) -> Self {
        let generator = Arc::new(BagGenerator::new(
            config.generator_command.clone(),
            config.generator_timeout,
        ));
        let formatter = Arc::new(XmlFormatter::new(
            config.formatter_command.clone(),
            config.formatter_timeout,
        ));
        Self {
            generator,
            formatter,
            output,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a batch of container archives, writing formatted records
    /// under `output_root` and returning the aggregated results.
    pub async fn run(
        &self,
        archives: Vec<PathBuf>,
        output_root: &Path,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<BatchResults> {
        let batch_start = Instant::now();
        let total = archives.len();

        if archives.is_empty() {
            return Ok(BatchResults::aggregate(
                Vec::new(),
                ResultIndex::new(),
                batch_start.elapsed(),
            ));
        }

        let (rows_tx, rows_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(ResultIndex::collect(rows_rx));

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_archives,
        ));
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = archives
            .into_iter()
            .map(|archive_path| {
                let semaphore = Arc::clone(&semaphore);
                let generator = Arc::clone(&self.generator);
                let formatter = Arc::clone(&self.formatter);
                let output = Arc::clone(&self.output);
                let completed = Arc::clone(&completed);
                let progress_callback = progress_callback.clone();
                let config = self.config.clone();
                let rows = rows_tx.clone();
                let output_root = output_root.to_path_buf();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        NormalizeError::Concurrency {
                            details: "failed to acquire worker semaphore".to_string(),
                        }
                    })?;

                    let outcome = process_archive(
                        &archive_path,
                        &output_root,
                        &generator,
                        &formatter,
                        &output,
                        &config,
                        &rows,
                    )
                    .await;

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(BatchProgress {
                            completed: done,
                            total,
                            current_archive: Some(archive_path),
                        });
                    }

                    Ok::<ArchiveOutcome, NormalizeError>(outcome)
                })
            })
            .collect();
        drop(rows_tx);

        let task_results =
            try_join_all(tasks)
                .await
                .map_err(|e| NormalizeError::Concurrency {
                    details: format!("Task join error: {}", e),
                })?;

        let mut archive_outcomes = Vec::with_capacity(task_results.len());
        for result in task_results {
            archive_outcomes.push(result?);
        }

        let index = collector.await.map_err(|e| NormalizeError::Concurrency {
            details: format!("Collector join error: {}", e),
        })?;

        Ok(BatchResults::aggregate(
            archive_outcomes,
            index,
            batch_start.elapsed(),
        ))
    }
}

/// Process one input archive; archive-level failures are captured in the
/// outcome, never propagated.
async fn process_archive(
    archive_path: &Path,
    output_root: &Path,
    generator: &BagGenerator,
    formatter: &XmlFormatter,
    output: &Output,
    config: &PipelineConfig,
    rows: &UnboundedSender<IndexEntry>,
) -> ArchiveOutcome {
    match process_archive_inner(
        archive_path,
        output_root,
        generator,
        formatter,
        output,
        config,
        rows,
    )
    .await
    {
        Ok(bags) => ArchiveOutcome {
            archive: archive_path.to_path_buf(),
            bags,
            error: None,
        },
        Err(error) => {
            output.archive_failed(archive_path, &error);
            ArchiveOutcome {
                archive: archive_path.to_path_buf(),
                bags: Vec::new(),
                error: Some(error.to_string()),
            }
        }
    }
}

async fn process_archive_inner(
    archive_path: &Path,
    output_root: &Path,
    generator: &BagGenerator,
    formatter: &XmlFormatter,
    output: &Output,
    config: &PipelineConfig,
    rows: &UnboundedSender<IndexEntry>,
) -> Result<Vec<BagOutcome>> {
    let archive_stem = archive_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let archive_out_dir = output_root.join(&archive_stem);
    tokio::fs::create_dir_all(&archive_out_dir).await?;

    // Open the container and list its atomzip members in listing order.
    let path = archive_path.to_path_buf();
    let (mut container, atomzips) = task::spawn_blocking(move || -> Result<(Container, Vec<String>)> {
        let file = File::open(&path)?;
        let mut container = ZipArchive::new(BufReader::new(file))?;
        let mut atomzips = Vec::new();
        for index in 0..container.len() {
            let name = container.by_index_raw(index)?.name().to_string();
            if name.contains("data/") && name.ends_with(ATOMZIP_SUFFIX) {
                atomzips.push(name);
            }
        }
        Ok((container, atomzips))
    })
    .await
    .map_err(join_error)??;

    let mut bags = Vec::with_capacity(atomzips.len());
    let mut first_bag = true;

    for member_name in atomzips {
        let Some(logical) = LogicalName::from_atomzip(&member_name) else {
            let error = NormalizeError::InvalidBagName {
                name: member_name.clone(),
            };
            output.bag_failed(&member_name, &error);
            bags.push(BagOutcome::failed(member_name, &error, Duration::ZERO));
            continue;
        };

        // The first bag's record is already inside the container; later
        // bags need the generator to materialize a companion archive.
        let use_container_record = first_bag;
        first_bag = false;

        let (returned, outcome) = process_bag(
            container,
            use_container_record,
            &logical,
            &archive_out_dir,
            generator,
            formatter,
            output,
            config,
            rows,
        )
        .await?;
        container = returned;
        bags.push(outcome);
    }

    Ok(bags)
}

/// Run one bag through the locate → classify → transform → format →
/// record sequence. Bag-level failures become a `Failed` outcome and the
/// container is handed back for the next bag; only a lost blocking task
/// (worker panic) aborts the archive.
async fn process_bag(
    container: Container,
    use_container_record: bool,
    logical: &LogicalName,
    archive_out_dir: &Path,
    generator: &BagGenerator,
    formatter: &XmlFormatter,
    output: &Output,
    config: &PipelineConfig,
    rows: &UnboundedSender<IndexEntry>,
) -> Result<(Container, BagOutcome)> {
    let bag_name = logical.bag_name();
    let bag_start = Instant::now();
    let max_depth = config.max_depth;

    let fail = |error: NormalizeError| {
        output.bag_failed(&bag_name, &error);
        BagOutcome::failed(bag_name.clone(), &error, bag_start.elapsed())
    };

    // Locate the record tree.
    let (container, located) = if use_container_record {
        with_container(container, move |container| {
            locator::find_member_tree(RECORD_FILENAME, container, max_depth)
        })
        .await?
    } else {
        let bag_path = match generator.generate(logical).await {
            Ok(Some(bag_path)) => bag_path,
            Ok(None) => {
                let error = ToolError::NoBagPath {
                    object: logical.object_id(),
                }
                .into();
                return Ok((container, fail(error)));
            }
            Err(error) => return Ok((container, fail(error))),
        };
        let located = task::spawn_blocking(move || -> Result<Option<Element>> {
            let file = File::open(&bag_path).map_err(|_| ToolError::BagArchiveMissing {
                path: bag_path.clone(),
            })?;
            let mut bag_archive = ZipArchive::new(BufReader::new(file))?;
            locator::find_member_tree(RECORD_FILENAME, &mut bag_archive, max_depth)
        })
        .await
        .map_err(join_error)?;
        (container, located)
    };

    let tree = match located {
        Ok(Some(tree)) => tree,
        Ok(None) => {
            let error = NormalizeError::RecordNotFound {
                fragment: RECORD_FILENAME.to_string(),
            };
            return Ok((container, fail(error)));
        }
        Err(error) => return Ok((container, fail(error))),
    };

    // Classify, then rewrite managed records in place. The externally
    // stored content always comes from the input container, even when the
    // record itself came from a generated companion archive.
    let managed = foxml::is_managed(&tree);
    if managed {
        output.bag_managed(&bag_name);
    } else {
        output.bag_inline(&bag_name);
    }

    let (container, serialized) = with_container(container, move |container| -> Result<String> {
        let mut tree = tree;
        if managed {
            transform::managed_to_inline(&mut tree, container, max_depth)?;
        }
        foxml::serialize(&tree)
    })
    .await?;

    let xml = match serialized {
        Ok(xml) => xml,
        Err(error) => return Ok((container, fail(error))),
    };

    let formatted = match formatter.format(&xml).await {
        Ok(formatted) => formatted,
        Err(error) => return Ok((container, fail(error))),
    };

    let bag_dir = archive_out_dir.join(&bag_name);
    let record_path = bag_dir.join(RECORD_FILENAME);
    if let Err(error) = write_record(&bag_dir, &record_path, &formatted).await {
        return Ok((container, fail(error)));
    }

    // Recording is fire-and-forget: the collector outlives the workers.
    let _ = rows.send(IndexEntry {
        bag_name: bag_name.clone(),
        converted_foxml_path: record_path.clone(),
    });

    Ok((
        container,
        BagOutcome::completed(bag_name, managed, record_path, bag_start.elapsed()),
    ))
}

/// Run blocking work against the archive handle on a blocking thread,
/// handing the handle back afterwards.
async fn with_container<T, F>(container: Container, work: F) -> Result<(Container, T)>
where
    F: FnOnce(&mut Container) -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(move || {
        let mut container = container;
        let value = work(&mut container);
        (container, value)
    })
    .await
    .map_err(join_error)
}

async fn write_record(bag_dir: &Path, record_path: &Path, contents: &str) -> Result<()> {
    tokio::fs::create_dir_all(bag_dir).await?;
    if let Err(error) = tokio::fs::write(record_path, contents).await {
        // No partial output may survive a failed item.
        let _ = tokio::fs::remove_file(record_path).await;
        return Err(error.into());
    }
    Ok(())
}

fn join_error(error: task::JoinError) -> NormalizeError {
    NormalizeError::Concurrency {
        details: format!("blocking task join error: {}", error),
    }
}
