use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

/// Main application configuration derived from CLI
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub verbose: bool,
    pub quiet: bool,
    pub progress: bool,
    pub formatter_command: Vec<String>,
    pub formatter_timeout: Duration,
    pub generator_command: Vec<String>,
    pub generator_timeout: Duration,
    pub max_depth: usize,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            input_dir: cli.input_dir.clone(),
            output_dir: cli.get_output_dir(),
            threads: cli.get_thread_count(),
            verbose: cli.verbose,
            quiet: cli.quiet,
            progress: cli.progress || (atty::is(atty::Stream::Stderr) && !cli.quiet),
            formatter_command: split_command(&cli.formatter_command),
            formatter_timeout: Duration::from_secs(cli.formatter_timeout),
            generator_command: split_command(&cli.generator_command),
            generator_timeout: Duration::from_secs(cli.generator_timeout),
            max_depth: cli.max_depth,
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}

/// Normalize FOXML records packaged in nested zip containers
#[derive(Parser, Debug, Clone)]
#[command(name = "inline-foxml")]
#[command(
    about = "Rewrite managed FOXML metadata to inline form across a batch of container archives"
)]
#[command(version)]
pub struct Cli {
    /// Directory of input container archives (.zip)
    #[arg(help = "Directory containing the input .zip containers")]
    pub input_dir: PathBuf,

    /// Output directory (default: a unique directory under the system temp dir)
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Number of concurrent archive workers
    #[arg(short = 't', long = "threads", help = "Number of concurrent archive workers")]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Show progress indicators
    #[arg(long = "progress")]
    pub progress: bool,

    /// Formatter invocation, fed the record XML on stdin
    #[arg(long = "formatter-command", default_value = "xmllint --format -")]
    pub formatter_command: String,

    /// Formatter timeout in seconds
    #[arg(long = "formatter-timeout", default_value = "10")]
    pub formatter_timeout: u64,

    /// Companion-archive generator invocation, completed with COLLECTION:PID
    #[arg(
        long = "generator-command",
        default_value = "drush @dsu --user=1 create-islandora-bag object"
    )]
    pub generator_command: String,

    /// Generator timeout in seconds
    #[arg(long = "generator-timeout", default_value = "300")]
    pub generator_timeout: u64,

    /// Cap on container nesting depth
    #[arg(long = "max-depth", default_value = "10")]
    pub max_depth: usize,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.input_dir.is_dir() {
            return Err(format!(
                "Input directory does not exist: {}",
                self.input_dir.display()
            ));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if self.max_depth == 0 {
            return Err("Nesting depth cap must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn get_thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    pub fn get_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("foxml_{}", uuid::Uuid::new_v4()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let args = vec!["inline-foxml", "/tmp"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.input_dir, PathBuf::from("/tmp"));
        assert_eq!(cli.formatter_timeout, 10);
        assert_eq!(cli.max_depth, 10);
    }

    #[test]
    fn test_command_splitting() {
        let args = vec!["inline-foxml", "/tmp", "--formatter-command", "cat"];
        let cli = Cli::try_parse_from(args).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.formatter_command, vec!["cat".to_string()]);
        assert_eq!(
            config.generator_command,
            vec!["drush", "@dsu", "--user=1", "create-islandora-bag", "object"]
        );
    }

    #[test]
    fn test_unique_output_dir_by_default() {
        let args = vec!["inline-foxml", "/tmp"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_ne!(cli.get_output_dir(), cli.get_output_dir());
    }

    #[test]
    fn test_verbosity_levels() {
        let args = vec!["inline-foxml", "/tmp", "--quiet"];
        let cli = Cli::try_parse_from(args).unwrap();
        let config = Config::from_cli(&cli);
        assert_eq!(config.verbosity(), VerbosityLevel::Quiet);
    }
}
