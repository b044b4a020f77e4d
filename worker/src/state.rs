// worker/src/state.rs

use chrono::{DateTime, Utc};
use common::{JobCounters, JobId, JobInfo, JobStatus, Task};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::rules::RuleBook;
use crate::scrape::ProductSource;

/// El ScrapeWorker (una sesión de navegador) lo usa un job a la vez.
pub type SharedSource = Arc<tokio::sync::Mutex<Box<dyn ProductSource>>>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sitio que sirve este worker (`site` de `POST /jobs/start`).
    pub site: String,
    /// Resultados (`<id>.json`) y logs (`<id>.log`) de cada job.
    pub output_dir: PathBuf,
    /// Páginas analizadas antes de fijar las reglas de una categoría.
    pub learn_sample_size: usize,
}

impl ServerConfig {
    pub fn result_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}.json"))
    }

    pub fn log_path(&self, id: JobId) -> PathBuf {
        crate::joblog::log_path(&self.output_dir, id)
    }

    /// ¿Es `site` (de `POST /jobs/start`) el sitio de este worker?
    pub fn serves(&self, site: &str) -> bool {
        self.site.eq_ignore_ascii_case(site.trim())
    }
}

/// Primer id libre en `dir`: uno más que el mayor `<n>.json` / `<n>.log`
/// que haya dejado una corrida anterior del worker.
pub fn first_free_id(dir: &Path) -> JobId {
    let Ok(entries) = fs::read_dir(dir) else {
        return 1;
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json" | "log") => path.file_stem()?.to_str()?.parse::<JobId>().ok(),
                _ => None,
            }
        })
        .max()
        .map_or(1, |last| last.saturating_add(1))
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub source: SharedSource,
    pub rules: Arc<RuleBook>,
    pub config: Arc<ServerConfig>,
    pub hostname: String,
}

impl AppState {
    pub fn new(source: Box<dyn ProductSource>, rules: RuleBook, config: ServerConfig) -> Self {
        let hostname = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self {
            registry: Arc::new(JobRegistry::starting_at(first_free_id(&config.output_dir))),
            source: Arc::new(tokio::sync::Mutex::new(source)),
            rules: Arc::new(rules),
            config: Arc::new(config),
            hostname,
        }
    }
}

pub struct JobEntry {
    pub info: JobInfo,
    pub cancel: CancellationToken,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} is already {status}")]
    AlreadyTerminal { id: JobId, status: JobStatus },
}

/// Tabla de jobs del proceso. Los handlers sólo leen o marcan estado
/// bajo el lock; el scraping corre afuera.
pub struct JobRegistry {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: JobId) -> Self {
        Self {
            next_id: AtomicU64::new(first.max(1)),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registra un job nuevo en `accepted` y devuelve su id y token.
    pub fn create(&self, task: Task, site: String) -> (JobId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let entry = JobEntry {
            info: JobInfo::new(id, task, site),
            cancel: cancel.clone(),
        };
        self.lock().insert(id, entry);
        (id, cancel)
    }

    pub fn get(&self, id: JobId) -> Option<JobInfo> {
        self.lock().get(&id).map(|e| e.info.clone())
    }

    /// Todos los jobs, ordenados por id.
    pub fn list(&self) -> Vec<JobInfo> {
        let mut all: Vec<JobInfo> = self.lock().values().map(|e| e.info.clone()).collect();
        all.sort_by_key(|j| j.id);
        all
    }

    pub fn mark_in_progress(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(e) if e.info.status == JobStatus::Accepted => {
                e.info.status = JobStatus::InProgress;
                true
            }
            _ => false,
        }
    }

    /// Cuenta un item procesado; los cuatro contadores cambian juntos.
    pub fn record_item(&self, id: JobId, success: bool) -> Option<JobCounters> {
        let mut jobs = self.lock();
        let entry = jobs.get_mut(&id)?;
        if entry.info.status.is_terminal()
            || entry.info.counters.processed_count >= entry.info.counters.total_count
        {
            return Some(entry.info.counters);
        }
        entry.info.counters.record(success);
        Some(entry.info.counters)
    }

    /// Cierra el job en un estado terminal. No hace nada si ya lo estaba.
    pub fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(e) => e.info.close(status, at, error),
            None => false,
        }
    }

    /// Pide el stop cooperativo: cancela el token y anota el motivo.
    /// El loop del job lo ve antes del próximo item.
    pub fn request_stop(&self, id: JobId, reason: Option<String>) -> Result<JobInfo, StopError> {
        let mut jobs = self.lock();
        let entry = jobs.get_mut(&id).ok_or(StopError::NotFound(id))?;
        if entry.info.status.is_terminal() {
            return Err(StopError::AlreadyTerminal {
                id,
                status: entry.info.status,
            });
        }
        entry.cancel.cancel();
        if reason.is_some() {
            entry.info.stop_reason = reason;
        }
        Ok(entry.info.clone())
    }
}
