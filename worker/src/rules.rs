//! Rule book: un `RuleSet` por categoría, persistido como JSON.
//!
//! Un `RuleSet` se aprende una sola vez por categoría y no cambia después;
//! aprender sobre una categoría que ya tiene reglas devuelve las existentes.

use anyhow::Result;
use common::patterns::{self, LearnerConfig, PageAnalysis, RuleSet};
use common::store;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tracing::info;

pub struct RuleBook {
    path: Option<PathBuf>,
    sets: RwLock<HashMap<String, RuleSet>>,
    learner: LearnerConfig,
}

impl RuleBook {
    /// Rule book sólo en memoria.
    pub fn in_memory(learner: LearnerConfig) -> Self {
        Self {
            path: None,
            sets: RwLock::new(HashMap::new()),
            learner,
        }
    }

    /// Carga `path` si existe; si no, arranca vacío y lo crea al primer aprendizaje.
    pub fn load(path: &Path, learner: LearnerConfig) -> Result<Self> {
        let sets: HashMap<String, RuleSet> = if path.exists() {
            store::read_json(path)?
        } else {
            HashMap::new()
        };
        info!("rule book {} con {} categorías", path.display(), sets.len());
        Ok(Self {
            path: Some(path.to_path_buf()),
            sets: RwLock::new(sets),
            learner,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RuleSet>> {
        self.sets.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RuleSet>> {
        self.sets.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, category: &str) -> Option<RuleSet> {
        self.read().get(category).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Aprende las reglas de `category` a partir de `analyses` y las persiste.
    pub fn learn(&self, category: &str, analyses: &[PageAnalysis]) -> Result<RuleSet> {
        let (set, snapshot) = {
            let mut sets = self.write();
            if let Some(existing) = sets.get(category) {
                return Ok(existing.clone());
            }
            let set = patterns::learn(analyses, category, &self.learner);
            sets.insert(category.to_string(), set.clone());
            (set, sets.clone())
        };

        info!(
            "reglas aprendidas para '{}': {} reglas sobre {} páginas (patterns_found={})",
            category,
            set.rules.len(),
            set.analyzed_sample_count,
            set.patterns_found
        );

        if let Some(path) = &self.path {
            store::write_json_atomic(path, &snapshot)?;
        }
        Ok(set)
    }
}
