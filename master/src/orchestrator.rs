//! Loop de despacho: una tarea por worker ocioso, polling de los ocupados
//! y descarga de resultados o logs cuando el job termina.

use anyhow::{bail, Context, Result};
use common::{
    store, JobId, JobStatus, JobStatusResponse, LogQuery, ResultMarker, StartJobRequest, Task,
    WorkerHandle,
};
use flate2::read::GzDecoder;
use std::{
    collections::VecDeque,
    io::Read,
    path::PathBuf,
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::client::WorkerApi;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub output_dir: PathBuf,
    pub site: String,
    pub poll_interval: Duration,
}

/// Lo que quedó de una corrida, para el resumen final.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub stopped: usize,
    pub failed: usize,
    /// Tareas descartadas: el worker las rechazó (400) o perdió el job (404).
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct Assignment {
    task: Task,
    job_id: JobId,
}

/// Un worker del registro = un slot de concurrencia.
#[derive(Debug)]
struct Slot {
    worker: WorkerHandle,
    current: Option<Assignment>,
}

impl Slot {
    fn name(&self) -> String {
        self.worker.base_url()
    }
}

enum PollOutcome {
    Running,
    Done,
    Retry,
}

pub struct Orchestrator<A> {
    api: A,
    slots: Vec<Slot>,
    queue: VecDeque<Task>,
    config: OrchestratorConfig,
    summary: RunSummary,
}

impl<A: WorkerApi> Orchestrator<A> {
    pub fn new(
        api: A,
        workers: Vec<WorkerHandle>,
        queue: VecDeque<Task>,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = workers
            .into_iter()
            .map(|worker| Slot {
                worker,
                current: None,
            })
            .collect();
        Self {
            api,
            slots,
            queue,
            config,
            summary: RunSummary::default(),
        }
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.current.is_some()).count()
    }

    fn is_done(&self) -> bool {
        self.queue.is_empty() && self.busy_count() == 0
    }

    /// Corre hasta vaciar la cola y que todos los workers queden ociosos.
    pub async fn run(mut self) -> Result<RunSummary> {
        if self.is_done() {
            info!("nada para procesar");
            return Ok(self.summary);
        }
        if self.slots.is_empty() {
            bail!("no hay workers vivos en el registro");
        }
        info!(
            "orquestando {} categorías sobre {} workers",
            self.queue.len(),
            self.slots.len()
        );

        loop {
            self.assign_idle().await;
            if self.is_done() {
                break;
            }
            sleep(self.config.poll_interval).await;
            self.poll_busy().await;
        }

        info!(
            "corrida terminada: {} completas, {} detenidas, {} fallidas, {} descartadas",
            self.summary.completed, self.summary.stopped, self.summary.failed, self.summary.dropped
        );
        Ok(self.summary)
    }

    /* ---------------- despacho ---------------- */

    async fn assign_idle(&mut self) {
        for i in 0..self.slots.len() {
            if self.slots[i].current.is_some() {
                continue;
            }
            let Some(task) = self.queue.pop_front() else {
                return;
            };

            let req = StartJobRequest::new(&task, &self.config.site);
            let slot = &mut self.slots[i];
            match self.api.start(&slot.worker, &req).await {
                Ok(resp) => {
                    info!(
                        "[{}] job {} para '{}' ({} items)",
                        slot.name(),
                        resp.job_id,
                        task.category_name,
                        task.identifiers.len()
                    );
                    slot.current = Some(Assignment {
                        task,
                        job_id: resp.job_id,
                    });
                }
                Err(e) if e.is_bad_request() => {
                    error!(
                        "[{}] rechazó '{}', se descarta: {}",
                        slot.name(),
                        task.category_name,
                        e
                    );
                    self.summary.dropped += 1;
                }
                Err(e) => {
                    warn!(
                        "[{}] no se pudo iniciar '{}', vuelve a la cola: {}",
                        slot.name(),
                        task.category_name,
                        e
                    );
                    self.queue.push_front(task);
                    // se reintenta en la próxima pasada
                    return;
                }
            }
        }
    }

    /* ---------------- polling ---------------- */

    async fn poll_busy(&mut self) {
        for i in 0..self.slots.len() {
            let Some(assignment) = self.slots[i].current.clone() else {
                continue;
            };
            let worker = self.slots[i].worker.clone();

            let outcome = match self.api.status(&worker, assignment.job_id).await {
                Ok(status) => self.on_status(&worker, &assignment, status).await,
                Err(e) if e.is_not_found() => {
                    warn!(
                        "[{}] perdió el job {} ('{}'), se descarta",
                        worker.base_url(),
                        assignment.job_id,
                        assignment.task.category_name
                    );
                    self.summary.dropped += 1;
                    PollOutcome::Done
                }
                Err(e) => {
                    warn!(
                        "[{}] status del job {} falló: {}",
                        worker.base_url(),
                        assignment.job_id,
                        e
                    );
                    PollOutcome::Retry
                }
            };

            if let PollOutcome::Done = outcome {
                self.slots[i].current = None;
            }
        }
    }

    async fn on_status(
        &mut self,
        worker: &WorkerHandle,
        assignment: &Assignment,
        status: JobStatusResponse,
    ) -> PollOutcome {
        let name = &assignment.task.category_name;
        let c = status.counters;

        if !status.status.is_terminal() {
            let pct = if c.total_count > 0 {
                c.processed_count as f64 * 100.0 / c.total_count as f64
            } else {
                0.0
            };
            debug!(
                "[{}] '{}' {} {}/{} ({:.1}%) ok={} fallidos={}",
                worker.base_url(),
                name,
                status.status,
                c.processed_count,
                c.total_count,
                pct,
                c.success_count,
                c.failed_count
            );
            return PollOutcome::Running;
        }

        info!(
            "[{}] '{}' {}: {}/{} ({} ok, {} fallidos)",
            worker.base_url(),
            name,
            status.status,
            c.processed_count,
            c.total_count,
            c.success_count,
            c.failed_count
        );

        match status.status {
            JobStatus::Failed => {
                error!("'{}' falló: {}", name, status.message);
                if let Err(e) = self.save_logs(worker, assignment).await {
                    warn!("no se pudieron guardar los logs de '{}': {:#}", name, e);
                }
                self.summary.failed += 1;
                PollOutcome::Done
            }
            _ => match self.save_result(worker, assignment).await {
                Ok(()) => {
                    if status.status == JobStatus::Stopped {
                        self.summary.stopped += 1;
                    } else {
                        self.summary.completed += 1;
                    }
                    PollOutcome::Done
                }
                Err(e) => {
                    warn!("descarga de '{}' falló, se reintenta: {:#}", name, e);
                    PollOutcome::Retry
                }
            },
        }
    }

    async fn save_result(&self, worker: &WorkerHandle, assignment: &Assignment) -> Result<()> {
        let gz = self
            .api
            .download(worker, assignment.job_id)
            .await
            .context("descarga")?;

        let mut raw = Vec::new();
        GzDecoder::new(gz.as_slice())
            .read_to_end(&mut raw)
            .context("gzip inválido")?;
        let marker: ResultMarker =
            serde_json::from_slice(&raw).context("documento de resultado inválido")?;

        let path = self
            .config
            .output_dir
            .join(store::result_file_name(&assignment.task.category_name));
        store::write_bytes_atomic(&path, &raw)?;
        info!(
            "resultado de '{}' guardado en {} ({} productos)",
            assignment.task.category_name,
            path.display(),
            marker.products.len()
        );
        Ok(())
    }

    async fn save_logs(&self, worker: &WorkerHandle, assignment: &Assignment) -> Result<()> {
        let text = self
            .api
            .logs(worker, assignment.job_id, &LogQuery::default())
            .await?;
        let path = self.config.output_dir.join(format!(
            "{}_job{}.log",
            store::sanitize_filename(&assignment.task.category_name),
            assignment.job_id
        ));
        store::write_bytes_atomic(&path, text.as_bytes())?;
        info!("logs del job {} en {}", assignment.job_id, path.display());
        Ok(())
    }
}
