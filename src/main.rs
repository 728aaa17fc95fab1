mod browser;
mod classify;
mod config;
mod db;
mod enrich;
mod hash;
mod parse;
mod pipeline;
mod session;
mod surface;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::browser::MapBrowser;
use crate::classify::OpenAiClassifier;
use crate::config::AppConfig;
use crate::db::Repository;
use crate::enrich::{Enricher, NaverLocalClient};
use crate::pipeline::PipelineCoordinator;
use crate::session::{ExtractionSession, SessionConfig};

#[derive(Parser)]
#[command(name = "popup_scraper", about = "Popup store crawler for the map search UI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and seed the category vocabulary
    Init,
    /// Crawl a search keyword and persist new listings
    Run {
        /// Search keyword (falls back to SEARCH_KEYWORD, then the default)
        #[arg(short, long)]
        keyword: Option<String>,
    },
    /// Show store counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init => {
            Repository::open(&config::db_path_from_env())?;
            println!("Schema ready.");
            Ok(())
        }
        Commands::Run { keyword } => run(keyword).await,
        Commands::Stats => {
            let repo = Repository::open(&config::db_path_from_env())?;
            let stats = repo.stats()?;
            println!("Stores:      {}", stats.stores);
            println!("Images:      {}", stats.images);
            println!("Assignments: {}", stats.assignments);
            for (name, count) in &stats.by_category {
                println!("  {:<12} {}", name, count);
            }
            Ok(())
        }
    }
}

async fn run(keyword: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let keyword = keyword
        .or_else(|| config.search_keyword.clone())
        .unwrap_or_else(|| config::DEFAULT_KEYWORD.to_string());

    if config.openai_api_key.is_some() {
        info!("classifier credential found, category classification enabled");
    } else {
        info!("no classifier credential, all listings will be tagged \"etc\"");
    }

    let repo = Repository::open(&config.db_path)?;
    let lookup = NaverLocalClient::new(
        config.naver_client_id.clone(),
        config.naver_client_secret.clone(),
    );
    let classifier = config.openai_api_key.as_deref().map(OpenAiClassifier::new);
    let mut pipeline = PipelineCoordinator::new(repo, Enricher::new(lookup), classifier);

    info!("starting crawl for {:?}", keyword);
    let browser = MapBrowser::launch().await?;
    let session = ExtractionSession::new(&browser, SessionConfig::default());
    let result = session.run(&keyword, &mut pipeline).await;
    if let Err(e) = browser.close().await {
        warn!("browser teardown failed: {:#}", e);
    }
    let stats = result?;

    let totals = pipeline.totals();
    println!(
        "Crawled {} pages, {} records extracted.",
        stats.page_count, stats.total_count
    );
    println!("Saved:   {}", totals.saved);
    println!("Skipped: {}", totals.skipped);
    Ok(())
}
