//! External tool bridge
//!
//! Two synchronous request/response collaborators, both invoked as
//! argument vectors (never through a shell, so logical names containing
//! metacharacters cannot inject):
//!
//! - the companion-archive generator, which materializes a bag holding the
//!   record when the input container does not already carry one, and
//!   reports the created archive's path on stdout;
//! - the XML canonical formatter, fed the serialized record on stdin.
//!
//! Both waits are bounded. A timeout or non-zero formatter exit is a
//! recoverable per-item failure, never a batch abort.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{NormalizeError, Result, ToolError};
use crate::index::LogicalName;

/// Default generator invocation, completed with `COLLECTION:PID`.
pub const DEFAULT_GENERATOR_COMMAND: &[&str] =
    &["drush", "@dsu", "--user=1", "create-islandora-bag", "object"];

/// Default formatter invocation, reformatting stdin to stdout.
pub const DEFAULT_FORMATTER_COMMAND: &[&str] = &["xmllint", "--format", "-"];

/// Default bound on the formatter wait.
pub const DEFAULT_FORMATTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on the generator wait. The upstream tool had none; a
/// hung generator would otherwise pin its worker for the whole batch.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(300);

/// Cached regex for the generator's bag-path report line
static BAG_PATH_REGEX: OnceLock<Regex> = OnceLock::new();

fn bag_path_regex() -> &'static Regex {
    BAG_PATH_REGEX.get_or_init(|| {
        Regex::new(r"Bag created and saved at ([^\n]+?\.zip)")
            .expect("Failed to compile bag path regex")
    })
}

/// Extract the created archive's path from generator stdout.
///
/// Absence of a match is a normal "no result" outcome, not a parse error:
/// the generator prints the line only on success.
pub fn extract_bag_path(stdout: &str) -> Option<PathBuf> {
    bag_path_regex()
        .captures(stdout)
        .map(|captures| PathBuf::from(captures[1].trim()))
}

/// Companion-archive generator invoked once per non-first bag.
#[derive(Debug, Clone)]
pub struct BagGenerator {
    command: Vec<String>,
    timeout: Duration,
}

impl BagGenerator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Run the generator for one logical name and report the path of the
    /// companion archive it created, or `None` when generation failed.
    /// Callers skip the item on `None`; there is no retry.
    pub async fn generate(&self, name: &LogicalName) -> Result<Option<PathBuf>> {
        let object = name.object_id();
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| NormalizeError::Config(
                "generator command is empty".to_string(),
            ))?;

        let child = Command::new(program)
            .args(args)
            .arg(&object)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            // The upstream tool is chatty on stderr even on success.
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::GeneratorTimeout {
                object: object.clone(),
                timeout_seconds: self.timeout.as_secs(),
            })?
            .map_err(NormalizeError::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(extract_bag_path(&stdout))
    }
}

/// Canonical XML formatter fed the serialized record on stdin.
#[derive(Debug, Clone)]
pub struct XmlFormatter {
    command: Vec<String>,
    timeout: Duration,
}

impl XmlFormatter {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Reformat one serialized record. Non-zero exit or timeout is a
    /// recoverable failure for the item only.
    pub async fn format(&self, xml: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| NormalizeError::Config(
                "formatter command is empty".to_string(),
            ))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                NormalizeError::Concurrency {
                    details: "failed to open formatter stdin".to_string(),
                }
            })?;
            // The formatter may exit before draining stdin; its exit
            // status decides the outcome, not a broken pipe here.
            let _ = stdin.write_all(xml.as_bytes()).await;
            // Dropping stdin closes the pipe so the formatter sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::FormatterTimeout {
                timeout_seconds: self.timeout.as_secs(),
            })?
            .map_err(NormalizeError::Io)?;

        if !output.status.success() {
            return Err(ToolError::FormatterFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        String::from_utf8(output.stdout).map_err(|_| ToolError::FormatterOutputNotUtf8.into())
    }
}
