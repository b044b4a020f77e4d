//! Armado de la cola de tareas a partir del catálogo y los artefactos.
//!
//! Reanudar una corrida depende sólo de lo que hay en disco: si ya existe
//! un resultado con tantos productos como identificadores, la categoría no
//! se vuelve a encolar.

use anyhow::Result;
use common::{store, Category, ResultMarker, Task};
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub ids_dir: PathBuf,
    pub output_dir: PathBuf,
    pub site: String,
    pub max_items_per_category: Option<usize>,
}

impl QueueOptions {
    pub fn identifiers_path(&self, category_name: &str) -> PathBuf {
        self.ids_dir
            .join(store::identifiers_file_name(&self.site, category_name))
    }

    pub fn result_path(&self, category_name: &str) -> PathBuf {
        self.output_dir.join(store::result_file_name(category_name))
    }
}

/// Lee un artefacto de identificadores (`["B0..", ...]`).
pub fn load_identifiers(path: &Path) -> Result<Vec<String>> {
    let ids: Vec<String> = store::read_json(path)?;
    Ok(ids
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Cantidad de productos del resultado ya descargado, si hay uno legible.
pub fn result_product_count(path: &Path) -> Option<usize> {
    if !path.exists() {
        return None;
    }
    match store::read_json::<ResultMarker>(path) {
        Ok(marker) => Some(marker.products.len()),
        Err(e) => {
            warn!("resultado ilegible {}: {:#}", path.display(), e);
            None
        }
    }
}

/// Una tarea por categoría con artefacto válido y sin resultado completo.
pub fn prepare_queue(catalog: &[Category], opts: &QueueOptions) -> VecDeque<Task> {
    let mut queue = VecDeque::new();

    for category in catalog {
        let path = opts.identifiers_path(&category.name);
        if !path.exists() {
            warn!("'{}': no hay artefacto {}", category.name, path.display());
            continue;
        }

        let mut identifiers = match load_identifiers(&path) {
            Ok(ids) if ids.is_empty() => {
                warn!("'{}': artefacto vacío, se salta", category.name);
                continue;
            }
            Ok(ids) => ids,
            Err(e) => {
                warn!("'{}': artefacto inválido: {:#}", category.name, e);
                continue;
            }
        };

        if let Some(max) = opts.max_items_per_category {
            identifiers.truncate(max);
        }

        if result_product_count(&opts.result_path(&category.name)) == Some(identifiers.len()) {
            info!(
                "'{}': ya tiene resultado completo ({} items), se salta",
                category.name,
                identifiers.len()
            );
            continue;
        }

        debug!("'{}': {} items encolados", category.name, identifiers.len());
        queue.push_back(Task {
            category_id: category.id,
            category_name: category.name.clone(),
            identifiers,
        });
    }

    info!(
        "cola lista: {} de {} categorías",
        queue.len(),
        catalog.len()
    );
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn setup() -> (tempfile::TempDir, QueueOptions) {
        let dir = tempfile::tempdir().unwrap();
        let opts = QueueOptions {
            ids_dir: dir.path().join("ids"),
            output_dir: dir.path().join("out"),
            site: "amazon".into(),
            max_items_per_category: None,
        };
        fs::create_dir_all(&opts.ids_dir).unwrap();
        fs::create_dir_all(&opts.output_dir).unwrap();
        (dir, opts)
    }

    fn cat(id: i64, name: &str) -> Category {
        Category {
            id,
            name: name.into(),
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("B{i:03}")).collect()
    }

    #[test]
    fn salta_artefactos_faltantes_vacios_o_rotos() {
        let (_dir, opts) = setup();
        fs::write(opts.identifiers_path("Vacía"), "[]").unwrap();
        fs::write(opts.identifiers_path("Rota"), "{no es json").unwrap();
        store::write_json_atomic(&opts.identifiers_path("Laptops"), &ids(3)).unwrap();

        let catalog = [
            cat(1, "Falta"),
            cat(2, "Vacía"),
            cat(3, "Rota"),
            cat(4, "Laptops"),
        ];
        let queue = prepare_queue(&catalog, &opts);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].category_id, 4);
        assert_eq!(queue[0].identifiers, ids(3));
    }

    #[test]
    fn reanuda_salteando_resultados_completos() {
        let (_dir, opts) = setup();
        store::write_json_atomic(&opts.identifiers_path("TVs"), &ids(10)).unwrap();
        store::write_json_atomic(&opts.identifiers_path("Phones"), &ids(4)).unwrap();

        let products: Vec<_> = (0..10).map(|i| json!({ "identifier": i })).collect();
        store::write_json_atomic(
            &opts.result_path("TVs"),
            &json!({ "category_id": 1, "products": products }),
        )
        .unwrap();
        // resultado parcial: se vuelve a encolar
        store::write_json_atomic(
            &opts.result_path("Phones"),
            &json!({ "category_id": 2, "products": [{}, {}] }),
        )
        .unwrap();

        let queue = prepare_queue(&[cat(1, "TVs"), cat(2, "Phones")], &opts);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].category_name, "Phones");
    }

    #[test]
    fn trunca_a_max_items() {
        let (_dir, mut opts) = setup();
        opts.max_items_per_category = Some(2);
        store::write_json_atomic(&opts.identifiers_path("TVs"), &ids(5)).unwrap();
        // con el truncado, 2 productos ya es un resultado completo
        let queue = prepare_queue(&[cat(1, "TVs")], &opts);
        assert_eq!(queue[0].identifiers, ids(2));

        store::write_json_atomic(
            &opts.result_path("TVs"),
            &json!({ "category_id": 1, "products": [{}, {}] }),
        )
        .unwrap();
        assert!(prepare_queue(&[cat(1, "TVs")], &opts).is_empty());
    }
}
