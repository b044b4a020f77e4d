//! Progreso a partir de lo que hay en disco: artefactos de identificadores,
//! resultados descargados y, si se pasa, el rule book del worker.

use anyhow::{Context, Result};
use common::{patterns::RuleSet, store, Category};
use glob::glob;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::warn;

use crate::queue::{load_identifiers, result_product_count, QueueOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRow {
    pub name: String,
    /// `None` si no hay artefacto legible.
    pub identifiers: Option<usize>,
    pub products: Option<usize>,
}

impl CategoryRow {
    pub fn is_complete(&self) -> bool {
        matches!((self.identifiers, self.products), (Some(i), Some(p)) if i > 0 && p >= i)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub rows: Vec<CategoryRow>,
    /// Artefactos en disco que no corresponden a ninguna categoría del catálogo.
    pub orphan_artifacts: Vec<PathBuf>,
    /// `(categorías con patrones, categorías aprendidas)` del rule book.
    pub rules: Option<(usize, usize)>,
}

impl Report {
    pub fn with_identifiers(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.identifiers, Some(n) if n > 0))
            .count()
    }

    pub fn empty(&self) -> usize {
        self.rows.iter().filter(|r| r.identifiers == Some(0)).count()
    }

    pub fn missing(&self) -> usize {
        self.rows.iter().filter(|r| r.identifiers.is_none()).count()
    }

    pub fn total_identifiers(&self) -> usize {
        self.rows.iter().filter_map(|r| r.identifiers).sum()
    }

    pub fn completed(&self) -> usize {
        self.rows.iter().filter(|r| r.is_complete()).count()
    }

    /// Las `n` categorías con más identificadores.
    pub fn top(&self, n: usize) -> Vec<&CategoryRow> {
        let mut rows: Vec<&CategoryRow> =
            self.rows.iter().filter(|r| r.identifiers.is_some()).collect();
        rows.sort_by(|a, b| b.identifiers.cmp(&a.identifiers));
        rows.truncate(n);
        rows
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{:<40} {:>12} {:>10}\n", "categoría", "identif.", "productos"));
        for row in &self.rows {
            let ids = row.identifiers.map_or("-".to_string(), |n| n.to_string());
            let products = row.products.map_or("-".to_string(), |n| n.to_string());
            let mark = if row.is_complete() { "✓" } else { " " };
            out.push_str(&format!("{:<40} {:>12} {:>10} {}\n", row.name, ids, products, mark));
        }
        out.push('\n');
        out.push_str(&format!(
            "categorías: {} (con identificadores {}, vacías {}, sin artefacto {})\n",
            self.rows.len(),
            self.with_identifiers(),
            self.empty(),
            self.missing()
        ));
        out.push_str(&format!("identificadores: {}\n", self.total_identifiers()));
        out.push_str(&format!("resultados completos: {}\n", self.completed()));
        if let Some((found, total)) = self.rules {
            out.push_str(&format!("reglas: {found}/{total} categorías con patrones\n"));
        }
        if !self.orphan_artifacts.is_empty() {
            out.push_str(&format!(
                "artefactos fuera del catálogo: {}\n",
                self.orphan_artifacts.len()
            ));
        }
        let top = self.top(5);
        if !top.is_empty() {
            out.push_str("top:\n");
            for row in top {
                out.push_str(&format!(
                    "  {}: {}\n",
                    row.name,
                    row.identifiers.unwrap_or_default()
                ));
            }
        }
        out
    }
}

pub fn build_report(
    catalog: &[Category],
    opts: &QueueOptions,
    rules_file: Option<&Path>,
) -> Result<Report> {
    let mut expected = HashSet::new();
    let mut rows = Vec::with_capacity(catalog.len());

    for category in catalog {
        let path = opts.identifiers_path(&category.name);
        expected.insert(path.clone());
        let identifiers = if path.exists() {
            match load_identifiers(&path) {
                Ok(ids) => Some(ids.len()),
                Err(e) => {
                    warn!("'{}': {:#}", category.name, e);
                    None
                }
            }
        } else {
            None
        };
        rows.push(CategoryRow {
            name: category.name.clone(),
            identifiers,
            products: result_product_count(&opts.result_path(&category.name)),
        });
    }

    let pattern = opts.ids_dir.join(format!(
        "{}_items_*.json",
        store::sanitize_filename(&opts.site)
    ));
    let pattern = pattern.to_string_lossy();
    let mut orphan_artifacts: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("patrón inválido {pattern}"))?
        .filter_map(|entry| entry.ok())
        .filter(|p| !expected.contains(p))
        .collect();
    orphan_artifacts.sort();

    let rules = match rules_file {
        Some(path) => {
            let sets: HashMap<String, RuleSet> = store::read_json(path)?;
            let found = sets.values().filter(|s| s.patterns_found).count();
            Some((found, sets.len()))
        }
        None => None,
    };

    Ok(Report {
        rows,
        orphan_artifacts,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cuenta_artefactos_resultados_y_huerfanos() {
        let dir = tempfile::tempdir().unwrap();
        let opts = QueueOptions {
            ids_dir: dir.path().join("ids"),
            output_dir: dir.path().join("out"),
            site: "amazon".into(),
            max_items_per_category: None,
        };
        store::write_json_atomic(&opts.identifiers_path("TVs"), &json!(["a", "b", "c"])).unwrap();
        store::write_json_atomic(&opts.identifiers_path("Phones"), &json!([])).unwrap();
        store::write_json_atomic(&opts.identifiers_path("Viejo"), &json!(["x"])).unwrap();
        store::write_json_atomic(
            &opts.result_path("TVs"),
            &json!({ "category_id": 1, "products": [{}, {}, {}] }),
        )
        .unwrap();

        let rules = dir.path().join("rules.json");
        store::write_json_atomic(
            &rules,
            &json!({
                "TVs": { "category": "TVs", "patterns_found": true, "rules": [], "analyzed_sample_count": 5 },
                "Phones": { "category": "Phones", "patterns_found": false, "rules": [], "analyzed_sample_count": 5 }
            }),
        )
        .unwrap();

        let catalog = [
            Category { id: 1, name: "TVs".into() },
            Category { id: 2, name: "Phones".into() },
            Category { id: 3, name: "Laptops".into() },
        ];
        let report = build_report(&catalog, &opts, Some(&rules)).unwrap();

        assert_eq!(report.with_identifiers(), 1);
        assert_eq!(report.empty(), 1);
        assert_eq!(report.missing(), 1);
        assert_eq!(report.total_identifiers(), 3);
        assert_eq!(report.completed(), 1);
        assert_eq!(report.rules, Some((1, 2)));
        assert_eq!(report.orphan_artifacts, vec![opts.identifiers_path("Viejo")]);
        assert_eq!(report.top(1)[0].name, "TVs");

        let text = report.render();
        assert!(text.contains("identificadores: 3"));
        assert!(text.contains("reglas: 1/2"));
    }
}
