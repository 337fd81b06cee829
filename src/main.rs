use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use syncdex::{
    config, connector_issues, connector_wiki, db, index, migrate, query, server, status, worker,
};

#[derive(Parser)]
#[command(name = "sdx", about = "Incremental multi-source sync into a unified search index")]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "sdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and run migrations
    Init,
    /// Run one delta sync and enqueue detected changes
    Sync {
        #[arg(value_enum)]
        source: SyncSource,
    },
    /// Process queued changes into the search index
    Work {
        /// Drain one batch and exit instead of polling
        #[arg(long)]
        once: bool,
    },
    /// Serve webhooks, chat commands, and the query API
    Serve,
    /// Search the index from the command line
    Query {
        text: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show watermarks and queue depth
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncSource {
    Wiki,
    Issues,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;

    match cli.command {
        Command::Init => {
            println!("initialized {}", cfg.db.path.display());
        }
        Command::Sync { source } => match source {
            SyncSource::Wiki => {
                connector_wiki::sync_wiki(&cfg, &pool).await?;
            }
            SyncSource::Issues => {
                connector_issues::sync_issues(&cfg, &pool).await?;
            }
            SyncSource::All => {
                connector_wiki::sync_wiki(&cfg, &pool).await?;
                connector_issues::sync_issues(&cfg, &pool).await?;
            }
        },
        Command::Work { once } => {
            let idx = index::create_index(&cfg.index)?;
            let w = worker::Worker::new(&cfg, pool.clone(), Arc::clone(&idx));
            if once {
                let processed = w.run_once().await?;
                println!("processed {} messages", processed);
            } else {
                w.run_loop().await?;
            }
        }
        Command::Serve => {
            server::serve(cfg, pool.clone()).await?;
        }
        Command::Query { text, top_k } => {
            query::run_query(&cfg, &text, top_k).await?;
        }
        Command::Status => {
            status::print_status(&cfg, &pool).await?;
        }
    }

    Ok(())
}
