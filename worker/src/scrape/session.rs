//! Capacidad de sesión de navegador que consume el ScrapeWorker.
//!
//! Las operaciones que se resuelven con JavaScript tienen implementación
//! por defecto sobre `evaluate`; un backend sólo está obligado a navegar,
//! evaluar, leer el DOM e interactuar con elementos.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Literal de string JS (JSON es un subconjunto válido).
pub fn js_string(s: &str) -> String {
    Value::from(s).to_string()
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Navega y espera la carga, con un timeout duro.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;
    /// Ejecuta JavaScript en la página y devuelve el resultado.
    async fn evaluate(&mut self, script: &str) -> Result<Value>;
    /// HTML completo de la página actual.
    async fn html(&mut self) -> Result<String>;
    /// Click en el primer elemento que matchea; `false` si no existe.
    async fn click(&mut self, selector: &str) -> Result<bool>;
    /// Escribe un solo carácter en el elemento (lo enfoca antes).
    async fn type_char(&mut self, selector: &str, c: char) -> Result<()>;
    async fn press_enter(&mut self, selector: &str) -> Result<()>;

    async fn ready_state(&mut self) -> Result<String> {
        let v = self.evaluate("document.readyState").await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn scroll_by(&mut self, dy: i64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy(0, {dy}); true")).await?;
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.evaluate("window.scrollTo(0, document.body.scrollHeight); true")
            .await?;
        Ok(())
    }

    async fn exists(&mut self, selector: &str) -> Result<bool> {
        let v = self
            .evaluate(&format!(
                "document.querySelector({}) !== null",
                js_string(selector)
            ))
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    /// Click en el elemento cuyo texto propio contiene `text`.
    async fn click_text(&mut self, text: &str) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const t = {};
                const own = e => Array.from(e.childNodes)
                    .some(n => n.nodeType === 3 && n.textContent.includes(t));
                const el = Array.from(document.querySelectorAll('body *')).find(own);
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            js_string(text)
        );
        let v = self.evaluate(&script).await?;
        Ok(v.as_bool().unwrap_or(false))
    }
}
