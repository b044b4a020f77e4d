use serde::{Deserialize, Serialize};

/// Unidad de trabajo del orquestador: una categoría con su lista de identificadores.
/// Se crea a partir del artefacto de la categoría y no cambia después de despacharse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub category_id: i64,
    pub category_name: String,
    /// Identificadores opacos de items, en el orden del artefacto.
    pub identifiers: Vec<String>,
}

/// Entrada del catálogo de categorías que recibe el orquestador.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}
