mod api;
mod cache;
mod config;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod product;
mod report;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use cache::Cache;
use config::Settings;
use parser::{ProductExtractor, Selectors};
use pipeline::{Pipeline, RunRequest};
use report::{summarize, ConsoleNotifier};

#[derive(Parser)]
#[command(name = "catalog_scraper", about = "Scrape a product catalog and report what changed")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Catalog listing URL; pages are requested as `?page=<n>`
    #[arg(long, env = "SCRAPER_URL", default_value = config::DEFAULT_URL, global = true)]
    url: String,
    /// Cache backend: redis://host:port/db, sqlite://<path> or memory
    #[arg(long, env = "SCRAPER_STORE", default_value = config::DEFAULT_STORE, global = true)]
    store: String,
    /// Attempts per page, first one included
    #[arg(long, env = "SCRAPER_RETRY_COUNT", default_value_t = 3, global = true)]
    retry_count: u32,
    /// Largest page depth a run may ask for
    #[arg(long, env = "SCRAPER_MAX_PAGES", default_value_t = 500, global = true)]
    max_pages: u32,
    /// Seconds to wait between attempts
    #[arg(long, env = "SCRAPER_RETRY_DELAY_SECS", default_value_t = 5, global = true)]
    retry_delay_secs: u64,
    /// Per-request timeout in seconds
    #[arg(long, env = "SCRAPER_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,
    /// Directory for the CSV export
    #[arg(long, env = "SCRAPER_EXPORT_DIR", default_value = ".", global = true)]
    export_dir: PathBuf,
    /// Export file is named export_<name>.csv
    #[arg(long, env = "SCRAPER_EXPORT_NAME", default_value = "products", global = true)]
    export_name: String,
    /// Comma-separated record fields written to the CSV
    #[arg(
        long,
        env = "SCRAPER_EXPORT_FIELDS",
        value_delimiter = ',',
        default_values = ["title", "price", "image_path"],
        global = true
    )]
    fields: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape pages 1..=N, update the cache and export it
    Scrape {
        /// Number of listing pages to fetch
        #[arg(short = 'n', long)]
        pages: Option<i64>,
        /// Proxy for both http and https requests
        #[arg(long, env = "SCRAPER_PROXY")]
        proxy: Option<String>,
    },
    /// Export the current cache contents without scraping
    Export,
    /// Serve GET /scrape over HTTP
    Serve {
        #[arg(long, env = "SCRAPER_BIND", default_value = "127.0.0.1:8000")]
        bind: String,
        /// Bearer token callers must present
        #[arg(long, env = "SCRAPER_API_TOKEN", hide_env_values = true)]
        token: String,
    },
}

impl GlobalArgs {
    fn settings(&self, show_progress: bool) -> Settings {
        Settings {
            url: self.url.clone(),
            retry_count: self.retry_count,
            max_page_depth: self.max_pages,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            export_dir: self.export_dir.clone(),
            export_name: self.export_name.clone(),
            export_fields: self
                .fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            show_progress,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let show_progress = matches!(cli.command, Commands::Scrape { .. });
    let settings = cli.global.settings(show_progress);
    settings.validate()?;

    let store = store::open_store(&cli.global.store)
        .await
        .with_context(|| format!("cannot open store {}", cli.global.store))?;
    let cache = Arc::new(Cache::new(store));

    match cli.command {
        Commands::Scrape { pages, proxy } => {
            let pipeline = build_pipeline(settings, cache)?;
            let session = pipeline.run(RunRequest { pages, proxy }).await?;
            eprintln!(
                "Session started {} ({} pages, proxy: {})",
                session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                session.page_depth,
                session.proxy.as_deref().unwrap_or("none")
            );
            println!("{}", serde_json::to_string_pretty(&summarize(&session))?);
            if let Some(path) = &session.exported {
                println!("Exported to {}", path.display());
            }
        }
        Commands::Export => {
            let path = settings.export_path();
            let rows = cache.export_all(&path, &settings.export_fields).await?;
            println!("Exported {} rows to {}", rows, path.display());
        }
        Commands::Serve { bind, token } => {
            let pipeline = build_pipeline(settings, cache)?;
            api::serve(Arc::new(pipeline), token, &bind).await?;
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

fn build_pipeline(settings: Settings, cache: Arc<Cache>) -> anyhow::Result<Pipeline> {
    let extractor = ProductExtractor::new(&Selectors::default())?;
    Ok(Pipeline::new(
        settings,
        Arc::new(extractor),
        cache,
        Arc::new(ConsoleNotifier),
    ))
}
