use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::Task;

/// Id de job: entero monotónico por proceso de worker.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Accepted,
    InProgress,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    /// Estados de los que un job ya no puede salir.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Stopped | JobStatus::Failed
        )
    }

    /// Sólo estos estados tienen un documento de resultado descargable.
    pub fn is_downloadable(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Accepted => "accepted",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Stopped => "stopped",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contadores de progreso de un job.
/// Invariante: `success_count + failed_count == processed_count <= total_count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub success_count: u32,
    pub failed_count: u32,
    pub processed_count: u32,
    pub total_count: u32,
}

impl JobCounters {
    pub fn new(total_count: u32) -> Self {
        Self {
            total_count,
            ..Self::default()
        }
    }

    /// Registra un item procesado. Los tres contadores se mueven juntos.
    pub fn record(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.processed_count += 1;
    }

    pub fn is_consistent(&self) -> bool {
        self.success_count + self.failed_count == self.processed_count
            && self.processed_count <= self.total_count
    }
}

/// Estado completo de un job dentro del worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub task: Task,
    pub site: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,

    /// Motivo del stop, si alguien lo pidió.
    pub stop_reason: Option<String>,
    /// Error que llevó el job a `failed`.
    pub error: Option<String>,
}

impl JobInfo {
    pub fn new(id: JobId, task: Task, site: String) -> Self {
        let total = task.identifiers.len() as u32;
        Self {
            id,
            task,
            site,
            status: JobStatus::Accepted,
            counters: JobCounters::new(total),
            started_at: Utc::now(),
            completed_at: None,
            stopped_at: None,
            stop_reason: None,
            error: None,
        }
    }

    /// Mensaje legible para la respuesta de status.
    pub fn message(&self) -> String {
        match self.status {
            JobStatus::Accepted => "Scraping accepted".to_string(),
            JobStatus::InProgress => "Scraping in progress".to_string(),
            JobStatus::Completed => "Scraping completed".to_string(),
            JobStatus::Stopped => "Scraping stopped".to_string(),
            JobStatus::Failed => self
                .error
                .clone()
                .unwrap_or_else(|| "Scraping failed".to_string()),
        }
    }

    /// Pasa el job a `status` (terminal) con su timestamp.
    /// Devuelve `false` y no toca nada si el job ya era terminal.
    pub fn close(&mut self, status: JobStatus, at: DateTime<Utc>, error: Option<String>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        match status {
            JobStatus::Stopped => self.stopped_at = Some(at),
            _ => self.completed_at = Some(at),
        }
        if error.is_some() {
            self.error = error;
        }
        true
    }

    pub fn status_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.id,
            status: self.status,
            counters: self.counters,
            message: self.message(),
        }
    }
}

/* --------- Mensajes del API HTTP del worker --------- */

/// Cuerpo de `POST /jobs/start`.
///
/// Los campos son opcionales a propósito: la validación la hace
/// [`StartJobRequest::into_task`] para poder responder 400 con un motivo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub category_id: Option<i64>,
    pub site: Option<String>,
    #[serde(alias = "asins")]
    pub item_identifiers: Option<Value>,
    pub category_name: Option<String>,
}

impl StartJobRequest {
    pub fn new(task: &Task, site: &str) -> Self {
        Self {
            category_id: Some(task.category_id),
            site: Some(site.to_string()),
            item_identifiers: Some(Value::from(task.identifiers.clone())),
            category_name: Some(task.category_name.clone()),
        }
    }

    /// Valida la petición y arma la tarea. Devuelve `(task, site)`.
    pub fn into_task(self) -> Result<(Task, Option<String>), String> {
        let category_id = self
            .category_id
            .ok_or_else(|| "category_id is required".to_string())?;

        let raw = self
            .item_identifiers
            .ok_or_else(|| "item_identifiers is required".to_string())?;
        let list = raw
            .as_array()
            .ok_or_else(|| "item_identifiers must be a list".to_string())?;
        if list.is_empty() {
            return Err("item_identifiers must not be empty".to_string());
        }

        let mut identifiers = Vec::with_capacity(list.len());
        for v in list {
            match v.as_str().map(str::trim) {
                Some(s) if !s.is_empty() => identifiers.push(s.to_string()),
                _ => return Err(format!("invalid identifier: {v}")),
            }
        }

        let category_name = self
            .category_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("category-{category_id}"));

        Ok((
            Task {
                category_id,
                category_name,
                identifiers,
            },
            self.site,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopJobRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    /// true si el token quedó cancelado; el loop del job lo verá en el próximo item.
    pub stop_requested: bool,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> StartJobRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn start_request_valido_arma_la_tarea() {
        let req = parse(json!({
            "category_id": 177800,
            "site": "amazon",
            "item_identifiers": ["B01", "B02"],
            "category_name": "4K TVs"
        }));

        let (task, site) = req.into_task().unwrap();
        assert_eq!(task.category_id, 177800);
        assert_eq!(task.category_name, "4K TVs");
        assert_eq!(task.identifiers, vec!["B01", "B02"]);
        assert_eq!(site.as_deref(), Some("amazon"));
    }

    #[test]
    fn start_request_acepta_alias_asins_y_nombre_por_defecto() {
        let req = parse(json!({ "category_id": 7, "asins": ["X"] }));
        let (task, site) = req.into_task().unwrap();
        assert_eq!(task.category_name, "category-7");
        assert_eq!(task.identifiers, vec!["X"]);
        assert!(site.is_none());
    }

    #[test]
    fn start_request_rechaza_entradas_invalidas() {
        assert!(parse(json!({ "item_identifiers": ["a"] })).into_task().is_err());
        assert!(parse(json!({ "category_id": 1 })).into_task().is_err());
        assert!(parse(json!({ "category_id": 1, "item_identifiers": [] }))
            .into_task()
            .is_err());
        assert!(parse(json!({ "category_id": 1, "item_identifiers": "B01" }))
            .into_task()
            .is_err());
        assert!(parse(json!({ "category_id": 1, "item_identifiers": [1, 2] }))
            .into_task()
            .is_err());
    }

    #[test]
    fn counters_se_mueven_juntos() {
        let mut c = JobCounters::new(3);
        c.record(true);
        c.record(false);
        assert_eq!(c.success_count, 1);
        assert_eq!(c.failed_count, 1);
        assert_eq!(c.processed_count, 2);
        assert!(c.is_consistent());
    }

    #[test]
    fn close_no_reabre_estados_terminales() {
        let task = Task {
            category_id: 1,
            category_name: "X".into(),
            identifiers: vec!["a".into()],
        };
        let mut job = JobInfo::new(1, task, "amazon".into());
        let now = Utc::now();

        assert!(!job.close(JobStatus::InProgress, now, None));
        assert!(job.close(JobStatus::Stopped, now, None));
        assert_eq!(job.stopped_at, Some(now));
        assert!(job.completed_at.is_none());

        assert!(!job.close(JobStatus::Failed, now, Some("boom".into())));
        assert_eq!(job.status, JobStatus::Stopped);
        assert!(job.error.is_none());
        assert_eq!(job.message(), "Scraping stopped");
    }

    #[test]
    fn status_serializa_en_snake_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Accepted.is_terminal());
        assert!(!JobStatus::Failed.is_downloadable());
    }
}
