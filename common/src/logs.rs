//! Consultas de sólo lectura sobre el log append-only de un job.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parámetros de `GET /jobs/{id}/logs`. Los tres modos son excluyentes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub tail: Option<usize>,
    pub grep: Option<String>,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// Todo el archivo.
    All,
    /// Rango de líneas 1-based `[from, to]`; `to` ausente = hasta el final.
    Range { from: usize, to: Option<usize> },
    /// Últimas N líneas.
    Tail(usize),
    /// Líneas que matchean, con su número de línea.
    Grep(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogQueryError {
    #[error("tail, grep and from/to are mutually exclusive")]
    ConflictingModes,
    #[error("`to` requires `from`")]
    ToWithoutFrom,
    #[error("invalid line range {from}..{to}")]
    InvalidRange { from: usize, to: usize },
    #[error("invalid grep pattern: {0}")]
    InvalidPattern(String),
}

impl LogQuery {
    pub fn tail(n: usize) -> Self {
        Self {
            tail: Some(n),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> Result<LogMode, LogQueryError> {
        let range = self.from.is_some() || self.to.is_some();
        let selected = [self.tail.is_some(), self.grep.is_some(), range]
            .iter()
            .filter(|b| **b)
            .count();
        if selected > 1 {
            return Err(LogQueryError::ConflictingModes);
        }

        if let Some(n) = self.tail {
            return Ok(LogMode::Tail(n));
        }
        if let Some(p) = &self.grep {
            return Ok(LogMode::Grep(p.clone()));
        }
        match (self.from, self.to) {
            (None, None) => Ok(LogMode::All),
            (None, Some(_)) => Err(LogQueryError::ToWithoutFrom),
            (Some(from), to) => {
                let from = from.max(1);
                if let Some(to) = to {
                    if to < from {
                        return Err(LogQueryError::InvalidRange { from, to });
                    }
                }
                Ok(LogMode::Range { from, to })
            }
        }
    }
}

/// Aplica el modo sobre el contenido del log y devuelve texto plano.
pub fn select_lines(content: &str, mode: &LogMode) -> Result<String, LogQueryError> {
    let lines: Vec<&str> = content.lines().collect();

    let selected: Vec<String> = match mode {
        LogMode::All => lines.iter().map(|l| l.to_string()).collect(),
        LogMode::Range { from, to } => {
            let start = from - 1;
            let end = to.unwrap_or(lines.len()).min(lines.len());
            if start >= end {
                Vec::new()
            } else {
                lines[start..end].iter().map(|l| l.to_string()).collect()
            }
        }
        LogMode::Tail(n) => {
            let start = lines.len().saturating_sub(*n);
            lines[start..].iter().map(|l| l.to_string()).collect()
        }
        LogMode::Grep(pattern) => {
            let re = Regex::new(pattern)
                .map_err(|e| LogQueryError::InvalidPattern(e.to_string()))?;
            lines
                .iter()
                .enumerate()
                .filter(|(_, l)| re.is_match(l))
                .map(|(i, l)| format!("{}:{}", i + 1, l))
                .collect()
        }
    };

    let mut out = selected.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}
