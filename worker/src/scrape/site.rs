//! Perfil del sitio que sirve el worker: URLs, selectores estables y
//! marcadores de páginas intermedias. Los valores por defecto son los de
//! Amazon; se puede sobreescribir cualquier campo con un JSON.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Valor de `site` que acepta `POST /jobs/start`.
    pub name: String,
    pub base_url: String,
    /// `{id}` se reemplaza por el identificador del item.
    pub item_path: String,
    /// `{query}` se reemplaza por la categoría codificada.
    pub search_path: String,
    /// Ruta "segura" a la que volver después de una página de bloqueo.
    pub safe_path: String,

    pub search_input: String,
    pub result_item: String,
    pub result_id_attr: String,
    /// `{n}` se reemplaza por el número de página.
    pub page_link: String,
    pub next_link: String,

    pub title: Vec<String>,
    pub price: Vec<String>,
    pub images: Vec<String>,
    pub description: Vec<String>,

    pub block_markers: Vec<String>,
    pub continue_markers: Vec<String>,
    /// Texto visible del botón que descarta la confirmación.
    pub continue_text: String,
    pub captcha_markers: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        let v = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            name: "amazon".into(),
            base_url: "https://www.amazon.com".into(),
            item_path: "/dp/{id}".into(),
            search_path: "/s?k={query}".into(),
            safe_path: "/ref=cs_503_link".into(),

            search_input: "input#twotabsearchtextbox".into(),
            result_item: r#"div[data-component-type="s-search-result"][data-asin]"#.into(),
            result_id_attr: "data-asin".into(),
            page_link: r#"a[aria-label="Go to page {n}"]"#.into(),
            next_link: "a.s-pagination-next:not(.s-pagination-disabled)".into(),

            title: v(&["span#productTitle", "h1#title", "h1.product-title"]),
            price: v(&[
                "span.a-price span.a-offscreen",
                "span#priceblock_ourprice",
                "span#priceblock_dealprice",
                "span.a-price-whole",
            ]),
            images: v(&["img#landingImage", "div#imgTagWrapperId img", "img.a-dynamic-image"]),
            description: v(&[
                "div#productDescription",
                "div#feature-bullets",
                "div.product-description",
            ]),

            block_markers: v(&["dogs of amazon"]),
            continue_markers: v(&["continue shopping"]),
            continue_text: "Continue shopping".into(),
            captcha_markers: v(&["captcha", "robot check"]),
        }
    }
}

impl SiteProfile {
    /// Perfil por defecto con los campos presentes en `path` sobreescritos.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("no se pudo leer el perfil {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("perfil de sitio inválido: {}", path.display()))
    }

    fn absolute(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn home_url(&self) -> String {
        self.absolute("/")
    }

    pub fn item_url(&self, identifier: &str) -> String {
        self.absolute(&self.item_path.replace("{id}", identifier))
    }

    pub fn search_url(&self, query: &str) -> String {
        self.absolute(&self.search_path.replace("{query}", &form_encode(query)))
    }

    pub fn safe_url(&self) -> String {
        self.absolute(&self.safe_path)
    }

    pub fn page_link_for(&self, page: usize) -> String {
        self.page_link.replace("{n}", &page.to_string())
    }
}

fn contains_any(haystack: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|m| !m.is_empty() && haystack.contains(&m.to_lowercase()))
}

impl SiteProfile {
    /// Página genérica de bloqueo ("dogs of amazon").
    pub fn is_block_page(&self, html: &str) -> bool {
        contains_any(&html.to_lowercase(), &self.block_markers)
    }

    /// Confirmación descartable con un botón "continue shopping".
    pub fn is_continue_prompt(&self, html: &str) -> bool {
        contains_any(&html.to_lowercase(), &self.continue_markers)
    }

    pub fn is_captcha(&self, html: &str) -> bool {
        contains_any(&html.to_lowercase(), &self.captcha_markers)
    }
}

// application/x-www-form-urlencoded para el query de búsqueda.
fn form_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Límites de tiempo de la sesión de navegador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub page_load: Duration,
    /// Espera de `document.readyState == "complete"`; vencida, se sigue igual.
    pub ready_wait: Duration,
    /// Espera del control de paginación en cada página de resultados.
    pub pagination_wait: Duration,
    pub captcha_poll: Duration,
    pub captcha_ceiling: Duration,
    /// Paso de las esperas acotadas por polling.
    pub poll_step: Duration,
}

impl Timeouts {
    /// Tiempos mínimos para tests con sesión falsa.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            page_load: Duration::from_millis(50),
            ready_wait: Duration::from_millis(5),
            pagination_wait: Duration::from_millis(5),
            captcha_poll: Duration::from_millis(1),
            captcha_ceiling: Duration::from_millis(20),
            poll_step: Duration::from_millis(1),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page_load: Duration::from_secs(20),
            ready_wait: Duration::from_secs(5),
            pagination_wait: Duration::from_secs(10),
            captcha_poll: Duration::from_secs(5),
            captcha_ceiling: Duration::from_secs(300),
            poll_step: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_del_perfil() {
        let p = SiteProfile::default();
        assert_eq!(p.item_url("B0TEST"), "https://www.amazon.com/dp/B0TEST");
        assert_eq!(p.search_url("4K TVs & more"), "https://www.amazon.com/s?k=4K+TVs+%26+more");
        assert_eq!(p.safe_url(), "https://www.amazon.com/ref=cs_503_link");
        assert_eq!(p.page_link_for(3), r#"a[aria-label="Go to page 3"]"#);
    }

    #[test]
    fn detecta_paginas_intermedias() {
        let p = SiteProfile::default();
        assert!(p.is_block_page("<h1>Sorry! The Dogs of Amazon</h1>"));
        assert!(p.is_continue_prompt("<button>Continue shopping</button>"));
        assert!(p.is_captcha("<title>Robot Check</title>"));
        assert!(p.is_captcha("<form action=\"/errors/validateCaptcha\">"));

        let normal = "<p>normal</p>";
        assert!(!p.is_block_page(normal) && !p.is_continue_prompt(normal) && !p.is_captcha(normal));
    }

    #[test]
    fn override_parcial_desde_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        std::fs::write(&path, r#"{"name": "shop", "base_url": "http://localhost:9000/"}"#).unwrap();

        let p = SiteProfile::load(&path).unwrap();
        assert_eq!(p.name, "shop");
        assert_eq!(p.item_url("X"), "http://localhost:9000/dp/X");
        assert_eq!(p.search_input, SiteProfile::default().search_input);
    }
}
