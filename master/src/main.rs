mod client;
mod config;
mod orchestrator;
mod queue;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use common::{load_registry, store, Category};
use flate2::read::GzDecoder;
use std::{io::Read, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::client::{HttpWorkerClient, WorkerApi};
use crate::config::{log_query, CatalogArgs, Cli, Command};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::queue::QueueOptions;

fn queue_options(args: &CatalogArgs) -> QueueOptions {
    QueueOptions {
        ids_dir: args.ids_dir.clone(),
        output_dir: args.output_dir.clone(),
        site: args.site.clone(),
        max_items_per_category: args.max_items_per_category,
    }
}

fn load_catalog(args: &CatalogArgs) -> Result<Vec<Category>> {
    store::read_json(&args.catalog)
        .with_context(|| format!("catálogo inválido: {}", args.catalog.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,common=info,reqwest=info")),
        )
        .init();

    let cli = Cli::parse();
    let api = HttpWorkerClient::new();

    match cli.command {
        Command::Run(args) => {
            let workers = load_registry(&args.registry)?;
            info!("{} workers vivos en {}", workers.len(), args.registry.display());

            let catalog = load_catalog(&args.catalog)?;
            let opts = queue_options(&args.catalog);
            let queue = queue::prepare_queue(&catalog, &opts);

            let config = OrchestratorConfig {
                output_dir: opts.output_dir.clone(),
                site: opts.site.clone(),
                poll_interval: Duration::from_secs(args.poll_secs),
            };
            let summary = Orchestrator::new(api, workers, queue, config).run().await?;
            println!(
                "completas: {}  detenidas: {}  fallidas: {}  descartadas: {}",
                summary.completed, summary.stopped, summary.failed, summary.dropped
            );
        }
        Command::Report(args) => {
            let catalog = load_catalog(&args.catalog)?;
            let report = report::build_report(
                &catalog,
                &queue_options(&args.catalog),
                args.rules_file.as_deref(),
            )?;
            print!("{}", report.render());
        }
        Command::Status { worker, job_id } => {
            let st = api.status(&worker.handle(), job_id).await?;
            let c = st.counters;
            println!("Job {}:", st.job_id);
            println!("  estado: {}", st.status);
            println!(
                "  procesados: {}/{} ({} ok, {} fallidos)",
                c.processed_count, c.total_count, c.success_count, c.failed_count
            );
            println!("  mensaje: {}", st.message);
        }
        Command::Stop {
            worker,
            job_id,
            reason,
        } => {
            let resp = api.stop(&worker.handle(), job_id, reason).await?;
            println!(
                "stop pedido para job {} (estado {}, {}/{} procesados)",
                resp.job_id, resp.status, resp.counters.processed_count, resp.counters.total_count
            );
        }
        Command::Logs {
            worker,
            job_id,
            tail,
            grep,
            from,
            to,
        } => {
            let query = log_query(tail, grep, from, to);
            let text = api.logs(&worker.handle(), job_id, &query).await?;
            print!("{text}");
        }
        Command::Download {
            worker,
            job_id,
            out,
        } => {
            let gz = api.download(&worker.handle(), job_id).await?;
            let mut raw = Vec::new();
            GzDecoder::new(gz.as_slice())
                .read_to_end(&mut raw)
                .context("gzip inválido")?;
            let path = out.unwrap_or_else(|| format!("job_{job_id}.json").into());
            store::write_bytes_atomic(&path, &raw)?;
            println!("resultado guardado en {}", path.display());
        }
    }

    Ok(())
}
