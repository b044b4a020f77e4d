//! Filtro de validez y normalización de nombres de atributo.

use regex::Regex;
use std::sync::OnceLock;

// Sintaxis que delata código embebido en el HTML (JS inline, plantillas, etc.).
const CODE_PATTERNS: &[&str] = &[
    r"(?i)function\s*\(",
    r"(?i)\bvar\s+\w+",
    r"(?i)\bconst\s+",
    r"(?i)\blet\s+",
    r"(?i)\breturn\b",
    r"(?i)\btypeof\s+",
    r"(?i)^\s*(if|for|while|switch|catch)\s*\(",
    r"(?i)window\.",
    r"(?i)document\.",
    r"(?i)\.(push|load|create|execute)\(",
    r"=>",
    r"===|!==",
    r"(?i)javascript:",
    r"(?i)void\(",
    r"__\w+__",
    r"^\w+\(",
];

const CSS_PROPERTIES: &[&str] = &[
    "color",
    "background",
    "margin",
    "padding",
    "border",
    "width",
    "height",
    "display",
    "position",
    "top",
    "left",
    "right",
    "bottom",
    "float",
    "font-size",
    "font-weight",
    "font-family",
    "line-height",
    "text-align",
    "word-wrap",
    "overflow",
    "z-index",
    "opacity",
    "cursor",
    "visibility",
];

/// Máximo de caracteres "raros" (ni alfanuméricos, ni espacio, ni `-`/`_`).
const MAX_SPECIAL_CHARS: usize = 2;

fn code_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CODE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// ¿Parece `name` un nombre de atributo de producto y no código / CSS / ruido?
pub fn is_valid_attribute_name(name: &str) -> bool {
    let name = name.trim();
    let Some(first) = name.chars().next() else {
        return false;
    };

    if name.contains(['{', '}', '[', ']']) {
        return false;
    }
    if code_patterns().iter().any(|re| re.is_match(name)) {
        return false;
    }

    let lower = name.to_lowercase();
    if CSS_PROPERTIES.contains(&lower.as_str()) {
        return false;
    }

    if !first.is_alphabetic() {
        return false;
    }
    if !name.chars().any(char::is_alphabetic) {
        return false;
    }

    let special = name
        .chars()
        .filter(|c| !(c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_'))
        .count();
    special <= MAX_SPECIAL_CHARS
}

/// Normaliza una clave: minúsculas, espacios -> `_`, sin caracteres no-palabra, sin `_` en los bordes.
pub fn normalize_attribute_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut pending_sep = false;

    for c in lower.chars() {
        if c.is_whitespace() {
            pending_sep = true;
            continue;
        }
        if !(c.is_alphanumeric() || c == '_') {
            continue;
        }
        if pending_sep && !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        pending_sep = false;
        out.push(c);
    }

    out.trim_matches('_').to_string()
}
