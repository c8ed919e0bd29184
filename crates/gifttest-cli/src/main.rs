//! gifttest CLI — practice GIFT question banks from the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

mod commands;

#[derive(Parser)]
#[command(name = "gifttest", version, about = "Practice tests from GIFT question banks")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a GIFT file and report problems
    Validate {
        /// Path to the .gift file
        #[arg(long)]
        file: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the categories of a GIFT file
    Categories {
        /// Path to the .gift file
        #[arg(long)]
        file: PathBuf,
    },

    /// Browse the questions of a GIFT file
    Questions {
        /// Path to the .gift file
        #[arg(long)]
        file: PathBuf,

        /// Only questions in this category
        #[arg(long)]
        category: Option<String>,

        /// Case-insensitive text to look for in ids, titles, categories, stems and answers
        #[arg(long)]
        search: Option<String>,
    },

    /// Take a test interactively
    Practice {
        /// Path to the .gift file
        #[arg(long)]
        file: PathBuf,

        /// Categories to draw from (comma-separated, default: all)
        #[arg(long)]
        categories: Option<String>,

        /// Number of questions (default: every question in the chosen categories)
        #[arg(long)]
        count: Option<usize>,

        /// Quick test: random questions from every category
        #[arg(long, conflicts_with = "categories")]
        quick: bool,

        /// Seed for a reproducible selection
        #[arg(long)]
        seed: Option<u64>,

        /// Provider used by the `e` (explain) command
        #[arg(long)]
        provider: Option<String>,
    },

    /// Show, summarize or clear past results
    History {
        /// Only tests taken from this bank
        #[arg(long)]
        source: Option<String>,

        /// Number of tests to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Print totals instead of a list
        #[arg(long, conflicts_with = "reset")]
        stats: bool,

        /// Delete every stored result
        #[arg(long)]
        reset: bool,

        /// Skip the confirmation prompt of --reset
        #[arg(long, requires = "reset")]
        yes: bool,
    },

    /// Ask an LLM to explain a question
    Explain {
        /// Path to the .gift file
        #[arg(long)]
        file: PathBuf,

        /// Question title, number or id
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        question: Option<String>,

        /// Explain every question in the bank, filling the cache
        #[arg(long)]
        all: bool,

        /// Provider name (default: from config)
        #[arg(long)]
        provider: Option<String>,

        /// Model id (default: the provider's configured model)
        #[arg(long)]
        model: Option<String>,

        /// Max concurrent requests with --all
        #[arg(long, default_value = "4")]
        parallelism: usize,
    },

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,
    },

    /// Create starter config and example question bank
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "gifttest=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Validate { file, json } => commands::validate::execute(file, json),
        Commands::Categories { file } => commands::categories::execute(file),
        Commands::Questions {
            file,
            category,
            search,
        } => commands::questions::execute(file, category, search),
        Commands::Practice {
            file,
            categories,
            count,
            quick,
            seed,
            provider,
        } => {
            let options = commands::practice::PracticeOptions {
                file,
                categories,
                count,
                quick,
                seed,
                provider,
            };
            commands::practice::execute(options, config).await
        }
        Commands::History {
            source,
            limit,
            stats,
            reset,
            yes,
        } => commands::history::execute(source, limit, stats, reset, yes, config),
        Commands::Explain {
            file,
            question,
            all,
            provider,
            model,
            parallelism,
        } => {
            commands::explain::execute(file, question, all, provider, model, parallelism, config)
                .await
        }
        Commands::ListModels { provider } => commands::list_models::execute(provider, config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
