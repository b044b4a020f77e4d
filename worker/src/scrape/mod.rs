//! ScrapeWorker: maneja una sesión de navegador para buscar categorías,
//! paginar resultados y bajar páginas de producto.

pub mod chromium;
pub mod pacing;
pub mod session;
pub mod site;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::patterns::{self, element_text, LearnerConfig, PageAnalysis, RuleSet};
use common::ProductRecord;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use pacing::Pacing;
pub use session::BrowserSession;
pub use site::{SiteProfile, Timeouts};

const MAX_IMAGES: usize = 5;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const HTML_SNIPPET_CHARS: usize = 5000;

/// Producto bajado más, si no había reglas, el análisis fresco de la página.
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub record: ProductRecord,
    pub analysis: Option<PageAnalysis>,
}

/// Lo que el Job Server necesita para procesar un item.
#[async_trait]
pub trait ProductSource: Send {
    /// El token se recibe pero no interrumpe una llamada en curso.
    async fn fetch_item(
        &mut self,
        identifier: &str,
        category: &str,
        rules: Option<&RuleSet>,
        cancel: &CancellationToken,
    ) -> FetchedItem;
}

pub struct ScrapeWorker<S> {
    session: S,
    site: SiteProfile,
    pacing: Pacing,
    timeouts: Timeouts,
    learner: LearnerConfig,
}

impl<S: BrowserSession> ScrapeWorker<S> {
    pub fn new(session: S, site: SiteProfile, pacing: Pacing, timeouts: Timeouts) -> Self {
        Self {
            session,
            site,
            pacing,
            timeouts,
            learner: LearnerConfig::default(),
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &S {
        &self.session
    }

    /* ---------------- navegación ---------------- */

    async fn wait_ready(&mut self) {
        let deadline = Instant::now() + self.timeouts.ready_wait;
        loop {
            match self.session.ready_state().await {
                Ok(state) if state == "complete" => return,
                Ok(_) => {}
                Err(e) => {
                    debug!("no se pudo leer readyState: {e:#}");
                    return;
                }
            }
            if Instant::now() >= deadline {
                debug!("readyState no llegó a complete, sigo igual");
                return;
            }
            sleep(self.timeouts.poll_step).await;
        }
    }

    // Scroll corto abajo/arriba: dispara contenido lazy.
    async fn human_scroll(&mut self) {
        let down = self.pacing.scroll_down.sample();
        if let Err(e) = self.session.scroll_by(down).await {
            debug!("scroll falló: {e:#}");
            return;
        }
        self.pacing.dwell.pause().await;

        let up = self.pacing.scroll_up.sample();
        if let Err(e) = self.session.scroll_by(-up).await {
            debug!("scroll falló: {e:#}");
        }
        self.pacing.settle.pause().await;
    }

    async fn load(&mut self, url: &str) -> Result<String> {
        self.session.navigate(url, self.timeouts.page_load).await?;
        self.wait_ready().await;
        self.human_scroll().await;
        self.session.html().await
    }

    async fn wait_captcha(&mut self) -> Option<String> {
        let step = self.timeouts.captcha_poll.max(std::time::Duration::from_millis(1));
        let mut waited = std::time::Duration::ZERO;
        while waited < self.timeouts.captcha_ceiling {
            sleep(step).await;
            waited += step;
            match self.session.html().await {
                Ok(html) if !self.site.is_captcha(&html) => {
                    info!("CAPTCHA resuelto tras {}s", waited.as_secs());
                    return Some(html);
                }
                Ok(_) => debug!("CAPTCHA sigue presente ({}s)", waited.as_secs()),
                Err(e) => warn!("error leyendo la página durante el CAPTCHA: {e:#}"),
            }
        }
        None
    }

    /// Navega a `url` y resuelve las páginas intermedias conocidas.
    ///
    /// Devuelve `None` sólo si falla la navegación o el CAPTCHA no se
    /// resuelve antes del techo.
    pub async fn fetch_with_recovery(&mut self, url: &str) -> Option<String> {
        info!("fetching {url}");
        let mut html = match self.load(url).await {
            Ok(h) => h,
            Err(e) => {
                warn!("no se pudo cargar {url}: {e:#}");
                return None;
            }
        };

        if self.site.is_block_page(&html) {
            warn!("página de bloqueo en {url}; paso por la ruta segura y reintento");
            let safe = self.site.safe_url();
            if let Err(e) = self.session.navigate(&safe, self.timeouts.page_load).await {
                warn!("no se pudo abrir {safe}: {e:#}");
                return None;
            }
            self.pacing.recovery.pause().await;
            self.pacing.recovery.pause().await;
            html = match self.load(url).await {
                Ok(h) => h,
                Err(e) => {
                    warn!("reintento de {url} falló: {e:#}");
                    return None;
                }
            };
        }

        if self.site.is_continue_prompt(&html) {
            info!("confirmación 'continue shopping' en {url}");
            self.pacing.settle.pause().await;
            let text = self.site.continue_text.clone();
            match self.session.click_text(&text).await {
                Ok(true) => {
                    self.wait_ready().await;
                    if let Ok(h) = self.session.html().await {
                        html = h;
                    }
                }
                Ok(false) => warn!("no se encontró el botón '{text}', sigo igual"),
                Err(e) => warn!("click en '{text}' falló: {e:#}, sigo igual"),
            }
        }

        if self.site.is_captcha(&html) {
            warn!(
                "CAPTCHA en {url}; esperando resolución manual (cada {}s, máximo {}s)",
                self.timeouts.captcha_poll.as_secs(),
                self.timeouts.captcha_ceiling.as_secs()
            );
            match self.wait_captcha().await {
                Some(h) => html = h,
                None => {
                    error!("CAPTCHA sin resolver en {url}; se saltea la página");
                    return None;
                }
            }
        }

        Some(html)
    }

    /* ---------------- producto ---------------- */

    fn extract(
        &self,
        identifier: &str,
        url: &str,
        category: &str,
        html: &str,
        rules: Option<&RuleSet>,
    ) -> FetchedItem {
        let mut record = ProductRecord::new(identifier, url);
        {
            let doc = Html::parse_document(html);
            record.title = first_text(&doc, &self.site.title);
            record.price = first_text(&doc, &self.site.price);
            record.images = image_sources(&doc, &self.site.images);
            record.description = description(&doc, &self.site.description);
        }

        let mut analysis = None;
        match rules.filter(|r| r.patterns_found) {
            Some(set) => {
                debug!("usando {} reglas de '{category}'", set.rules.len());
                record.attributes = patterns::apply(html, &set.rules);
            }
            None => {
                let fresh = patterns::analyze(html, url, &self.learner);
                if fresh.success {
                    record.attributes = patterns::apply(html, &fresh.rules);
                } else {
                    warn!(
                        "análisis de {url} falló: {}",
                        fresh.error.as_deref().unwrap_or("desconocido")
                    );
                }
                analysis = Some(fresh);
            }
        }

        if record.attributes.is_empty() {
            warn!("sin atributos para {url}; guardo un prefijo del HTML");
            record.html_snippet = Some(html.chars().take(HTML_SNIPPET_CHARS).collect());
        }

        FetchedItem { record, analysis }
    }

    pub async fn fetch_item(
        &mut self,
        identifier: &str,
        category: &str,
        rules: Option<&RuleSet>,
        _cancel: &CancellationToken,
    ) -> FetchedItem {
        let url = self.site.item_url(identifier);
        match self.fetch_with_recovery(&url).await {
            Some(html) => self.extract(identifier, &url, category, &html, rules),
            None => FetchedItem {
                record: ProductRecord::failed(identifier, &url, "Failed to fetch page"),
                analysis: None,
            },
        }
    }

    /* ---------------- búsqueda ---------------- */

    async fn type_query(&mut self, query: &str) -> Result<()> {
        let input = self.site.search_input.clone();
        if !self.session.exists(&input).await.unwrap_or(false) {
            bail!("no está el buscador ({input})");
        }
        for c in query.chars() {
            self.session.type_char(&input, c).await?;
            self.pacing.keystroke.pause().await;
        }
        self.pacing.settle.pause().await;
        self.session.press_enter(&input).await?;
        self.pacing.settle.pause().await;
        self.wait_ready().await;
        Ok(())
    }

    async fn submit_search(&mut self, query: &str) -> Result<()> {
        let home = self.site.home_url();
        let typed = match self.session.navigate(&home, self.timeouts.page_load).await {
            Ok(()) => {
                self.pacing.settle.pause().await;
                self.type_query(query).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = typed {
            warn!("búsqueda por teclado falló ({e:#}); voy directo a la URL de búsqueda");
            let url = self.site.search_url(query);
            if self.fetch_with_recovery(&url).await.is_none() {
                bail!("no se pudo abrir la búsqueda {url}");
            }
        }
        Ok(())
    }

    async fn wait_for_pagination(&mut self, page: usize) -> bool {
        let next_page = self.site.page_link_for(page + 1);
        let next = self.site.next_link.clone();
        let deadline = Instant::now() + self.timeouts.pagination_wait;
        loop {
            let found = self.session.exists(&next_page).await.unwrap_or(false)
                || self.session.exists(&next).await.unwrap_or(false);
            if found {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.timeouts.poll_step).await;
        }
    }

    fn result_identifiers(&self, html: &str) -> Vec<String> {
        let Ok(sel) = Selector::parse(&self.site.result_item) else {
            warn!("selector de resultados inválido: {}", self.site.result_item);
            return Vec::new();
        };
        let doc = Html::parse_document(html);
        let ids: Vec<String> = doc
            .select(&sel)
            .filter_map(|el| el.value().attr(&self.site.result_id_attr))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        ids
    }

    /// Busca `category` y junta identificadores de hasta `max_pages` páginas.
    pub async fn scan_identifiers(&mut self, category: &str, max_pages: usize) -> Result<Vec<String>> {
        info!("buscando '{category}' (máximo {max_pages} páginas)");
        self.submit_search(category).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut identifiers: Vec<String> = Vec::new();

        for page in 1..=max_pages.max(1) {
            if let Err(e) = self.session.scroll_to_bottom().await {
                debug!("scroll al fondo falló: {e:#}");
            }
            if !self.wait_for_pagination(page).await {
                debug!("página {page}: no apareció el control de paginación");
            }

            let html = self
                .session
                .html()
                .await
                .with_context(|| format!("no se pudo leer la página {page} de resultados"))?;
            let found = self.result_identifiers(&html);
            let before = identifiers.len();
            for id in found.iter() {
                if seen.insert(id.clone()) {
                    identifiers.push(id.clone());
                }
            }
            info!(
                "página {page}: {} resultados, {} nuevos (total {})",
                found.len(),
                identifiers.len() - before,
                identifiers.len()
            );

            if page >= max_pages {
                break;
            }

            let next_page = self.site.page_link_for(page + 1);
            let next = self.site.next_link.clone();
            let moved = self.session.click(&next_page).await.unwrap_or(false)
                || self.session.click(&next).await.unwrap_or(false);
            if !moved {
                info!("no hay página siguiente después de la {page}");
                break;
            }
            self.pacing.settle.pause().await;
            self.wait_ready().await;
        }

        Ok(identifiers)
    }
}

#[async_trait]
impl<S: BrowserSession> ProductSource for ScrapeWorker<S> {
    async fn fetch_item(
        &mut self,
        identifier: &str,
        category: &str,
        rules: Option<&RuleSet>,
        cancel: &CancellationToken,
    ) -> FetchedItem {
        ScrapeWorker::fetch_item(self, identifier, category, rules, cancel).await
    }
}

/* ---------------- extracción por selectores estables ---------------- */

fn parse_selectors(list: &[String]) -> impl Iterator<Item = Selector> + '_ {
    list.iter().filter_map(|css| Selector::parse(css).ok())
}

fn first_text(doc: &Html, selectors: &[String]) -> Option<String> {
    parse_selectors(selectors).find_map(|sel| {
        doc.select(&sel)
            .map(element_text)
            .find(|t| !t.is_empty())
    })
}

fn image_sources(doc: &Html, selectors: &[String]) -> Vec<String> {
    for sel in parse_selectors(selectors) {
        let found: Vec<String> = doc
            .select(&sel)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.trim().is_empty())
            .map(str::to_string)
            .take(MAX_IMAGES)
            .collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

fn description(doc: &Html, selectors: &[String]) -> Option<String> {
    parse_selectors(selectors).find_map(|sel| {
        let text = doc
            .select(&sel)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            None
        } else {
            Some(text.chars().take(MAX_DESCRIPTION_CHARS).collect())
        }
    })
}
