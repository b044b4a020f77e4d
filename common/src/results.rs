use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::{JobCounters, JobId, JobInfo, JobStatus};

/// Mapa dinámico de atributos: clave normalizada -> valor tal como aparece en la página.
/// Es la salida de una heurística abierta, así que no se tipa más.
pub type AttributeMap = BTreeMap<String, String>;

/// Un producto scrapeado. Si `error` está presente el item cuenta como fallido.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub identifier: String,
    #[serde(default)]
    pub url: String,
    pub title: Option<String>,
    pub price: Option<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
    #[serde(default)]
    pub images: Vec<String>,
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Prefijo del HTML crudo cuando no salió ningún atributo, para diagnóstico offline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_snippet: Option<String>,
}

impl ProductRecord {
    pub fn new(identifier: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn failed(identifier: impl Into<String>, url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(identifier, url)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Documento de resultado que persiste el worker al terminar un job
/// y que el orquestador descarga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDocument {
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    #[serde(flatten)]
    pub counters: JobCounters,
    pub category_id: i64,
    pub category: String,
    pub products: Vec<ProductRecord>,
}

impl ResultDocument {
    pub fn from_job(job: &JobInfo, products: Vec<ProductRecord>) -> Self {
        Self {
            job_id: job.id,
            started_at: job.started_at,
            completed_at: job.completed_at,
            stopped_at: job.stopped_at,
            status: job.status,
            counters: job.counters,
            category_id: job.task.category_id,
            category: job.task.category_name.clone(),
            products,
        }
    }
}

/// Vista mínima de un documento de resultado, suficiente para decidir
/// si una categoría ya está completa sin cargar todos los productos tipados.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMarker {
    pub category_id: Option<i64>,
    pub products: Vec<serde_json::Value>,
}
