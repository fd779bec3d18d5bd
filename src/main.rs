use std::process::ExitCode;
use std::sync::Arc;

use inline_foxml::{
    ArchiveDiscovery, BatchProgress, Cli, Config, NormalizeEngine, Output, PipelineConfig,
    ProgressCallback,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(message) = cli.validate() {
        eprintln!("{}", message);
        return ExitCode::from(127);
    }

    let config = Config::from_cli(&cli);
    let output = Arc::new(Output::new(config.verbosity()));

    // Fatal: the batch never starts without its output directory.
    if let Err(error) = tokio::fs::create_dir_all(&config.output_dir).await {
        eprintln!(
            "Failed to create output directory {}: {}",
            config.output_dir.display(),
            error
        );
        return ExitCode::FAILURE;
    }

    output.banner(&config.output_dir);

    let discovery = ArchiveDiscovery::new();
    let archives = match discovery.discover_archives(&config.input_dir).await {
        Ok(archives) => archives,
        Err(error) => {
            eprintln!(
                "Failed to enumerate {}: {}",
                config.input_dir.display(),
                error
            );
            return ExitCode::FAILURE;
        }
    };

    let progress_callback: Option<ProgressCallback> = if config.progress {
        let progress_output = Arc::clone(&output);
        Some(Arc::new(move |progress: BatchProgress| {
            progress_output.progress(progress.completed, progress.total);
        }))
    } else {
        None
    };

    let engine = NormalizeEngine::new(PipelineConfig::from_config(&config), Arc::clone(&output));
    let results = match engine
        .run(archives, &config.output_dir, progress_callback)
        .await
    {
        Ok(results) => results,
        Err(error) => {
            eprintln!("Batch failed: {}", error);
            return ExitCode::FAILURE;
        }
    };

    let index_path = config.output_dir.join("map.csv");
    if let Err(error) = results.index.write_csv(&index_path) {
        eprintln!("Failed to write {}: {}", index_path.display(), error);
        return ExitCode::FAILURE;
    }

    print!("{}", output.format_summary(&results));

    // Per-item failures are reported inline and in the summary; they do
    // not change the exit status.
    ExitCode::SUCCESS
}
