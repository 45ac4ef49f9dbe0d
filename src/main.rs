use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratforge::cli::CommandContext;
use stratforge::cli::commands::{self, RequestArgs};

#[derive(Parser)]
#[command(name = "stratforge")]
#[command(
    version,
    about = "Cost-optimized, cache-aware strategy analysis pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project lookup
    #[arg(long, short, global = true, env = "STRATFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(clap::Args)]
struct RequestFlags {
    #[arg(long, help = "Company to analyze")]
    company: Option<String>,
    #[arg(long, help = "Industry the company operates in")]
    industry: Option<String>,
    #[arg(long, default_value = "", help = "Problem statement")]
    challenge: String,
    #[arg(long, help = "JSON file with extracted company data")]
    data: Option<PathBuf>,
}

impl From<RequestFlags> for RequestArgs {
    fn from(flags: RequestFlags) -> Self {
        Self {
            company: flags.company.unwrap_or_default(),
            industry: flags.industry.unwrap_or_default(),
            challenge: flags.challenge,
            data: flags.data,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a request (reuses cached analyses)
    Run {
        #[command(flatten)]
        request: RequestFlags,
        #[arg(long, conflicts_with_all = ["company", "industry", "data"], help = "JSON file with an array of requests")]
        batch: Option<PathBuf>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Rerun a request, bypassing and then replacing the cached analysis
    Regenerate {
        #[command(flatten)]
        request: RequestFlags,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Show a run's status, or recent runs
    Status {
        #[arg(help = "Run id")]
        run_id: Option<String>,
        #[arg(short = 'n', long, default_value = "10", help = "Number of recent runs")]
        limit: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Show cache statistics per tier
    Stats {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Delete expired cache entries
    Purge {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Explain model routing
    Route {
        #[arg(long, requires = "score", help = "Task type to route")]
        task: Option<String>,
        #[arg(long, requires = "task", help = "Complexity score (0.0-1.0)")]
        score: Option<f64>,
        #[arg(long, conflicts_with = "task", help = "JSON file with extracted data")]
        data: Option<PathBuf>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            help = "Output format: toml, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mstratforge encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "stratforge=debug,info"
    } else if cli.quiet {
        "error"
    } else {
        "warn,stratforge=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            request,
            batch,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            match batch {
                Some(path) => rt.block_on(commands::run::run_batch(&ctx, &path, &format))?,
                None => rt.block_on(commands::run::run(&ctx, request.into(), &format))?,
            }
        }
        Commands::Regenerate { request, format } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::regenerate::run(&ctx, request.into(), &format))?;
        }
        Commands::Status {
            run_id,
            limit,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::status::run(
                &ctx,
                run_id.as_deref(),
                limit,
                &format,
            ))?;
        }
        Commands::Stats { format } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::stats::run(&ctx, &format))?;
        }
        Commands::Purge { format } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::purge::run(&ctx, &format))?;
        }
        Commands::Route {
            task,
            score,
            data,
            format,
        } => {
            let config = stratforge::cli::load_config(config_path)?;
            commands::route::run(
                &config,
                task.as_deref(),
                score,
                data.as_deref(),
                &format,
            )?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                commands::config::show(config_path, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
