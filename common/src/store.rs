//! Escrituras a disco compartidas por worker y orquestador.
//!
//! Todo archivo que otro proceso pueda leer (resultados, artefactos de
//! identificadores, rule book) se escribe a un temporal en el mismo
//! directorio y luego se renombra, así nadie ve un archivo a medias.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};
use tracing::warn;

/// Reintentos ante errores transitorios de I/O.
pub const WRITE_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(100);

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Escribe `bytes` en `path` vía temporal + rename, con reintentos acotados.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("no se pudo crear {}", parent.display()))?;
        }
    }

    let mut last_err = None;
    for attempt in 1..=WRITE_ATTEMPTS {
        match write_once(path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    "escritura de {} falló (intento {}/{}): {}",
                    path.display(),
                    attempt,
                    WRITE_ATTEMPTS,
                    e
                );
                last_err = Some(e);
                if attempt < WRITE_ATTEMPTS {
                    thread::sleep(RETRY_DELAY * attempt);
                }
            }
        }
    }

    Err(last_err
        .map(anyhow::Error::from)
        .unwrap_or_else(|| anyhow::anyhow!("escritura fallida")))
    .with_context(|| format!("no se pudo escribir {}", path.display()))
}

fn write_once(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

// Temporal único por proceso y por escritura: dos escritores sobre el
// mismo directorio nunca comparten temporal.
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

/// Serializa a JSON con indentación y escribe de forma atómica.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("error serializando JSON")?;
    write_bytes_atomic(path, &bytes)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("no se pudo leer {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("JSON inválido en {}", path.display()))
}

/// Nombre de archivo seguro a partir de un nombre de categoría:
/// espacios -> `_`, sin comillas, sólo alfanuméricos, `_` y `-`, en minúscula.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\'' && *c != '"')
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

/// Artefacto de identificadores de una categoría: `<site>_items_<nombre>.json`.
pub fn identifiers_file_name(site: &str, category_name: &str) -> String {
    format!(
        "{}_items_{}.json",
        sanitize_filename(site),
        sanitize_filename(category_name)
    )
}

/// Resultado descargado de una categoría: `result_<nombre>.json`.
pub fn result_file_name(category_name: &str) -> String {
    format!("result_{}.json", sanitize_filename(category_name))
}
