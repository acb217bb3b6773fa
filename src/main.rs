use clap::Parser;
use remedy::config::{self, BackendChoice, BackendKind, RunConfig};
use remedy::error::CoreError;
use remedy::report::Reporter;
use remedy::run::{self, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Repair defects in a codebase with an iterative model-assisted loop",
    version
)]
struct Args {
    /// Directory containing the project files to repair
    #[arg(default_value = ".")]
    code_dir: PathBuf,

    /// Maximum repair attempts per file
    #[arg(short, long, default_value_t = config::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Specific files to repair, relative to CODE_DIR (default: every .py file)
    #[arg(long, num_args = 1..)]
    files_to_debug: Option<Vec<PathBuf>>,

    /// Fetch reference snippets when stuck on the same error ('true' or 'false')
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_internet_search: bool,

    /// Number of reference snippets to fetch per search
    #[arg(long, default_value_t = config::DEFAULT_NUM_SEARCH_URLS)]
    num_search_urls: usize,

    /// Consecutive occurrences of the same error that trigger a search
    #[arg(long, default_value_t = config::DEFAULT_SEARCH_THRESHOLD)]
    internet_search_threshold: u32,

    /// Model backend: openai, ollama, or gemini
    #[arg(long, default_value = "openai")]
    backend: String,

    /// OpenAI model name (openai backend)
    #[arg(long, default_value = config::DEFAULT_OPENAI_MODEL)]
    openai_model: String,

    /// Base url for an OpenAI-compatible endpoint (openai backend)
    #[arg(long, default_value = config::DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Model served by the local Ollama instance (ollama backend)
    #[arg(long, default_value = config::DEFAULT_OLLAMA_MODEL)]
    ollama_model: String,

    /// Ollama server url (ollama backend)
    #[arg(long, default_value = config::DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Gemini model name (gemini backend)
    #[arg(long, default_value = config::DEFAULT_GEMINI_MODEL)]
    gemini_model: String,
}

fn build_config(args: Args) -> Result<RunConfig, CoreError> {
    let backend = match BackendKind::from_str(&args.backend)? {
        BackendKind::OpenAi => BackendChoice::OpenAi {
            model: args.openai_model,
            base_url: args.openai_base_url,
        },
        BackendKind::Ollama => BackendChoice::Ollama {
            model: args.ollama_model,
            base_url: args.ollama_url,
        },
        BackendKind::Gemini => BackendChoice::Gemini {
            model: args.gemini_model,
        },
    };

    Ok(RunConfig {
        code_dir: args.code_dir,
        max_attempts: args.max_attempts,
        files_to_debug: args.files_to_debug,
        enable_internet_search: args.enable_internet_search,
        num_search_urls: args.num_search_urls,
        internet_search_threshold: args.internet_search_threshold,
        backend,
    })
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run summary:");
    for result in &summary.results {
        println!(
            "  {} {}: {} ({} attempt(s), {} error(s) remaining)",
            result.status.icon(),
            result.file.display(),
            result.status.label(),
            result.attempts.len(),
            result.remaining.len()
        );
    }
    if let Some(path) = &summary.log_path {
        println!();
        println!("Attempt log: {}", path.display());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let reporter = Reporter::new(false);

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C cancels the remaining attempts; committed history stays intact
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Interrupted - cancelling remaining attempts...");
            let _ = cancel_tx.send(true);
        }
    });

    match run::run(config, reporter, cancel_rx).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.all_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
