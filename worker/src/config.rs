use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

use crate::scrape::{SiteProfile, Timeouts};
use crate::state::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "worker", about = "Job Server de scraping de atributos de productos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Levanta el API HTTP de jobs.
    Serve(ServeArgs),
    /// Busca cada categoría y guarda la lista de identificadores encontrada.
    Scan(ScanArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "SCRAPER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SCRAPER_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "SCRAPER_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Rule book por categoría; por defecto `<output-dir>/rules.json`.
    #[arg(long, env = "SCRAPER_RULES_FILE")]
    pub rules_file: Option<PathBuf>,

    /// Páginas analizadas antes de fijar las reglas de una categoría.
    /// No cambia cuántas claves se muestrean por contenedor.
    #[arg(long, default_value_t = 5)]
    pub learn_sample_size: usize,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

impl ServeArgs {
    pub fn rules_path(&self) -> PathBuf {
        self.rules_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join("rules.json"))
    }

    pub fn server_config(&self, site: &str) -> ServerConfig {
        ServerConfig {
            site: site.to_string(),
            output_dir: self.output_dir.clone(),
            learn_sample_size: self.learn_sample_size,
        }
    }
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// JSON con `[{"id": .., "name": ..}, ...]`.
    #[arg(long, env = "SCRAPER_CATEGORIES")]
    pub categories: PathBuf,

    #[arg(long, default_value_t = 20)]
    pub max_pages: usize,

    #[arg(long, env = "SCRAPER_IDS_DIR", default_value = "ids")]
    pub ids_dir: PathBuf,

    #[command(flatten)]
    pub browser: BrowserArgs,
}

#[derive(Debug, Args)]
pub struct BrowserArgs {
    /// JSON que pisa los selectores y URLs del sitio por defecto.
    #[arg(long, env = "SCRAPER_SITE_PROFILE")]
    pub site_profile: Option<PathBuf>,

    #[arg(long, env = "SCRAPER_HEADLESS")]
    pub headless: bool,

    #[arg(long, default_value_t = 20)]
    pub page_load_secs: u64,

    /// Tiempo máximo esperando que alguien resuelva un CAPTCHA.
    #[arg(long, default_value_t = 300)]
    pub captcha_ceiling_secs: u64,
}

impl BrowserArgs {
    pub fn site(&self) -> anyhow::Result<SiteProfile> {
        match &self.site_profile {
            Some(path) => SiteProfile::load(path),
            None => Ok(SiteProfile::default()),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            page_load: Duration::from_secs(self.page_load_secs),
            captcha_ceiling: Duration::from_secs(self.captcha_ceiling_secs),
            ..Timeouts::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_con_defaults() {
        let cli = Cli::try_parse_from(["worker", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("esperaba serve");
        };
        assert_eq!(args.learn_sample_size, 5);
        assert_eq!(args.rules_path(), PathBuf::from("output").join("rules.json"));
        assert!(!args.browser.headless);
        assert_eq!(args.browser.timeouts().captcha_ceiling, Duration::from_secs(300));
        assert_eq!(args.browser.site().unwrap().name, "amazon");
    }

    #[test]
    fn scan_requiere_categorias() {
        assert!(Cli::try_parse_from(["worker", "scan"]).is_err());
        let cli =
            Cli::try_parse_from(["worker", "scan", "--categories", "c.json", "--max-pages", "3"])
                .unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("esperaba scan");
        };
        assert_eq!(args.max_pages, 3);
        assert_eq!(args.ids_dir, PathBuf::from("ids"));
    }

    #[test]
    fn learn_sample_size_solo_cuenta_paginas() {
        let cli = Cli::try_parse_from(["worker", "serve", "--learn-sample-size", "10"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("esperaba serve");
        };
        let config = args.server_config("amazon");
        assert_eq!(config.learn_sample_size, 10);
        assert_eq!(config.site, "amazon");
    }
}
