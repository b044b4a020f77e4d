use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::{Context, Result};

/// Liveness con la que el registro externo marca a un worker utilizable.
pub const LIVENESS_RUNNING: &str = "running";

/// Un worker (Job Server) tal como lo publica el registro externo.
/// Un handle = un slot de concurrencia para el orquestador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    #[serde(alias = "ip")]
    pub address: String,
    pub port: u16,
    #[serde(alias = "status", default = "default_liveness")]
    pub liveness: String,
}

fn default_liveness() -> String {
    LIVENESS_RUNNING.to_string()
}

impl WorkerHandle {
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}:{}", self.address.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }

    pub fn is_running(&self) -> bool {
        self.liveness.eq_ignore_ascii_case(LIVENESS_RUNNING)
    }
}

/// El registro puede venir como lista plana o como `{ "targets": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RegistryFile {
    List(Vec<WorkerHandle>),
    Targets { targets: Vec<WorkerHandle> },
}

/// Lee el registro de workers y devuelve sólo los que están vivos.
pub fn load_registry(path: &Path) -> Result<Vec<WorkerHandle>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer el registro {}", path.display()))?;
    let parsed: RegistryFile = serde_json::from_str(&raw)
        .with_context(|| format!("registro de workers inválido: {}", path.display()))?;

    let all = match parsed {
        RegistryFile::List(list) => list,
        RegistryFile::Targets { targets } => targets,
    };

    Ok(all.into_iter().filter(WorkerHandle::is_running).collect())
}
