use clap::{Args, Parser, Subcommand};
use common::{JobId, LogQuery, WorkerHandle};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "master")]
#[command(about = "Orquestador: reparte categorías entre Job Servers y junta los resultados")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Procesa todas las categorías pendientes del catálogo.
    Run(RunArgs),
    /// Muestra el progreso según lo que hay en disco.
    Report(ReportArgs),
    /// Estado de un job en un worker.
    Status {
        #[command(flatten)]
        worker: WorkerArgs,
        job_id: JobId,
    },
    /// Pide el stop de un job.
    Stop {
        #[command(flatten)]
        worker: WorkerArgs,
        job_id: JobId,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Imprime el log de un job.
    Logs {
        #[command(flatten)]
        worker: WorkerArgs,
        job_id: JobId,
        #[arg(long)]
        tail: Option<usize>,
        #[arg(long)]
        grep: Option<String>,
        #[arg(long)]
        from: Option<usize>,
        #[arg(long)]
        to: Option<usize>,
    },
    /// Baja el resultado de un job y lo guarda descomprimido.
    Download {
        #[command(flatten)]
        worker: WorkerArgs,
        job_id: JobId,
        /// Por defecto `job_<id>.json`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    /// JSON con `[{"id": .., "name": ..}, ...]`.
    #[arg(long, env = "SCRAPER_CATALOG")]
    pub catalog: PathBuf,

    #[arg(long, env = "SCRAPER_IDS_DIR", default_value = "ids")]
    pub ids_dir: PathBuf,

    #[arg(long, env = "SCRAPER_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(long, env = "SCRAPER_SITE", default_value = "amazon")]
    pub site: String,

    #[arg(long)]
    pub max_items_per_category: Option<usize>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Registro de workers (`[{address, port, liveness}]` o `{targets: [...]}`).
    #[arg(long, env = "SCRAPER_REGISTRY")]
    pub registry: PathBuf,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long, default_value_t = 5)]
    pub poll_secs: u64,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Rule book del worker, para contar categorías con patrones.
    #[arg(long)]
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long, env = "SCRAPER_WORKER_ADDRESS", default_value = "localhost")]
    pub address: String,

    #[arg(long, env = "SCRAPER_WORKER_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl WorkerArgs {
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            address: self.address.clone(),
            port: self.port,
            liveness: common::worker::LIVENESS_RUNNING.to_string(),
        }
    }
}

pub fn log_query(
    tail: Option<usize>,
    grep: Option<String>,
    from: Option<usize>,
    to: Option<usize>,
) -> LogQuery {
    LogQuery {
        tail,
        grep,
        from,
        to,
    }
}
