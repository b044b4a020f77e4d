mod config;
mod error;
mod handlers;
mod joblog;
mod rules;
mod runner;
mod scrape;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use common::{patterns::LearnerConfig, store, Category};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::{Cli, Command, ScanArgs, ServeArgs};
use crate::handlers::build_router;
use crate::joblog::JobLogLayer;
use crate::rules::RuleBook;
use crate::scrape::{chromium::ChromiumSession, Pacing, ScrapeWorker};
use crate::state::AppState;

fn init_tracing(job_logs: Option<JobLogLayer>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worker=debug,common=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(job_logs)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Scan(args) => scan(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let job_logs = JobLogLayer::new(&args.output_dir)
        .with_context(|| format!("no se pudo crear {}", args.output_dir.display()))?;
    init_tracing(Some(job_logs));

    let site = args.browser.site()?;
    let rules = RuleBook::load(&args.rules_path(), LearnerConfig::default())?;

    let session = ChromiumSession::launch(args.browser.headless).await?;
    let scraper = ScrapeWorker::new(session, site.clone(), Pacing::human(), args.browser.timeouts());

    let config = args.server_config(&site.name);
    let state = AppState::new(Box::new(scraper), rules, config);
    let app = build_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("dirección inválida {}:{}", args.host, args.port))?;
    info!(
        "Job Server para '{}' escuchando en {} (host {})",
        site.name, addr, state.hostname
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("apagando Job Server");
        })
        .await?;
    Ok(())
}

async fn scan(args: ScanArgs) -> Result<()> {
    init_tracing(None);

    let categories: Vec<Category> = store::read_json(&args.categories)?;
    let site = args.browser.site()?;
    let session = ChromiumSession::launch(args.browser.headless).await?;
    let mut scraper =
        ScrapeWorker::new(session, site.clone(), Pacing::human(), args.browser.timeouts());

    for category in &categories {
        match scraper.scan_identifiers(&category.name, args.max_pages).await {
            Ok(ids) if ids.is_empty() => {
                warn!("'{}': sin identificadores, no se escribe artefacto", category.name);
            }
            Ok(ids) => {
                let path = args
                    .ids_dir
                    .join(store::identifiers_file_name(&site.name, &category.name));
                store::write_json_atomic(&path, &ids)?;
                info!("'{}': {} identificadores -> {}", category.name, ids.len(), path.display());
            }
            Err(e) => warn!("'{}': búsqueda fallida: {:#}", category.name, e),
        }
    }
    Ok(())
}
