//! Aprendizaje de patrones de extracción por categoría.
//!
//! `analyze` propone reglas para una página, `learn` las agrega sobre una
//! muestra de páginas de la misma categoría y `apply` las usa para sacar
//! atributos de páginas nuevas. Todo es síncrono: el DOM de `scraper` no es
//! `Send`, así que el documento se parsea y se suelta sin cruzar un `.await`.

mod extract;
pub mod keys;

use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::results::AttributeMap;

pub use extract::{clean_text, element_text, CONTAINER_HINTS, MAX_KEY_LEN};
pub use keys::{is_valid_attribute_name, normalize_attribute_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Table,
    DefinitionList,
    LabelledDiv,
    BulletList,
    /// `ol` de fichas `rpi-attribute-label` / `rpi-attribute-value` (libros).
    AttributeList,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Table,
        SourceKind::DefinitionList,
        SourceKind::LabelledDiv,
        SourceKind::BulletList,
        SourceKind::AttributeList,
    ];
}

/// Cómo reencontrar un contenedor en otra página de la misma plantilla.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    Id { tag: String, id: String },
    Class { tag: String, class: String },
    Position { tag: String, index: usize },
}

impl Locator {
    pub fn tag(&self) -> &str {
        match self {
            Locator::Id { tag, .. } | Locator::Class { tag, .. } | Locator::Position { tag, .. } => tag,
        }
    }

    /// 1 = id, 2 = class, 3 = posicional. Menor es más estable.
    pub fn priority(&self) -> u8 {
        match self {
            Locator::Id { .. } => 1,
            Locator::Class { .. } => 2,
            Locator::Position { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub source_kind: SourceKind,
    pub locator: Locator,
    pub sample_keys: Vec<String>,
    pub priority: u8,
    /// En cuántas páginas analizadas apareció la regla (0 hasta `learn`).
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractionRule {
    fn new(source_kind: SourceKind, locator: Locator, sample_keys: Vec<String>) -> Self {
        Self {
            priority: locator.priority(),
            source_kind,
            locator,
            sample_keys,
            frequency: 0,
            confidence: 0.0,
        }
    }

    fn identity(&self) -> (SourceKind, &Locator) {
        (self.source_kind, &self.locator)
    }
}

/// Resultado de analizar una página.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rules: Vec<ExtractionRule>,
}

impl PageAnalysis {
    fn failed(url: &str, error: &str) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error.to_string()),
            rules: Vec::new(),
        }
    }
}

/// Reglas aprendidas para una categoría. Puede no tener reglas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub category: String,
    pub patterns_found: bool,
    pub rules: Vec<ExtractionRule>,
    pub analyzed_sample_count: usize,
}

impl RuleSet {
    pub fn empty(category: &str) -> Self {
        Self {
            category: category.to_string(),
            patterns_found: false,
            rules: Vec::new(),
            analyzed_sample_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub max_rules: usize,
    /// Claves muestreadas por contenedor para decidir si es ruido.
    pub sample_size: usize,
    pub table_threshold: f64,
    pub list_threshold: f64,
    pub container_threshold: f64,
    pub bullet_threshold: f64,
    pub attribute_list_threshold: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            max_rules: 5,
            sample_size: 5,
            table_threshold: 0.6,
            list_threshold: 0.6,
            container_threshold: 0.8,
            bullet_threshold: 0.8,
            attribute_list_threshold: 0.8,
        }
    }
}

impl LearnerConfig {
    pub fn threshold(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Table => self.table_threshold,
            SourceKind::DefinitionList => self.list_threshold,
            SourceKind::LabelledDiv => self.container_threshold,
            SourceKind::BulletList => self.bullet_threshold,
            SourceKind::AttributeList => self.attribute_list_threshold,
        }
    }
}

/// Propone reglas para una página.
pub fn analyze(html: &str, url: &str, cfg: &LearnerConfig) -> PageAnalysis {
    if html.trim().is_empty() {
        return PageAnalysis::failed(url, "empty document");
    }
    if !html.contains('<') {
        return PageAnalysis::failed(url, "no markup found");
    }

    let doc = Html::parse_document(html);
    let mut rules: Vec<ExtractionRule> = Vec::new();

    for kind in SourceKind::ALL {
        for (position, el) in extract::containers(&doc, kind) {
            let sample: Vec<String> = extract::raw_pairs(kind, el)
                .into_iter()
                .map(|(k, _)| k)
                .take(cfg.sample_size)
                .collect();
            if sample.is_empty() {
                continue;
            }

            let valid: Vec<String> = sample
                .iter()
                .filter(|k| is_valid_attribute_name(k))
                .cloned()
                .collect();
            let ratio = valid.len() as f64 / sample.len() as f64;
            if valid.is_empty() || ratio < cfg.threshold(kind) {
                continue;
            }

            let rule = ExtractionRule::new(kind, extract::locator_for(el, position), valid);
            if !rules.iter().any(|r| r.identity() == rule.identity()) {
                rules.push(rule);
            }
        }
    }

    rules.sort_by_key(|r| r.priority);
    debug!("{}: {} reglas candidatas", url, rules.len());

    PageAnalysis {
        url: url.to_string(),
        success: true,
        error: None,
        rules,
    }
}

/// Agrega los análisis de una categoría en un `RuleSet`.
///
/// Las reglas se agrupan por (tipo, localizador) y se ordenan por número de
/// páginas en las que aparecieron; a igualdad gana la que se vio primero.
pub fn learn(analyses: &[PageAnalysis], category: &str, cfg: &LearnerConfig) -> RuleSet {
    let mut groups: Vec<(ExtractionRule, u32)> = Vec::new();
    let mut index: HashMap<(SourceKind, Locator), usize> = HashMap::new();

    for analysis in analyses.iter().filter(|a| a.success) {
        let mut seen_here: HashSet<(SourceKind, Locator)> = HashSet::new();
        for rule in &analysis.rules {
            let key = (rule.source_kind, rule.locator.clone());
            if !seen_here.insert(key.clone()) {
                continue;
            }
            match index.get(&key) {
                Some(&i) => groups[i].1 += 1,
                None => {
                    index.insert(key, groups.len());
                    groups.push((rule.clone(), 1));
                }
            }
        }
    }

    // sort_by es estable: el orden de primera aparición desempata.
    groups.sort_by(|a, b| b.1.cmp(&a.1));

    let total = analyses.len().max(1) as f64;
    let rules: Vec<ExtractionRule> = groups
        .into_iter()
        .take(cfg.max_rules)
        .map(|(mut rule, count)| {
            rule.frequency = count;
            rule.confidence = count as f64 / total;
            rule
        })
        .collect();

    RuleSet {
        category: category.to_string(),
        patterns_found: !rules.is_empty(),
        rules,
        analyzed_sample_count: analyses.len(),
    }
}

/// Extrae atributos de una página con reglas ya aprendidas.
///
/// Las reglas se recorren por prioridad (estable respecto al ranking) y una
/// clave ya insertada nunca se sobreescribe.
pub fn apply(html: &str, rules: &[ExtractionRule]) -> AttributeMap {
    let mut attributes = AttributeMap::new();
    if rules.is_empty() || html.trim().is_empty() {
        return attributes;
    }

    let doc = Html::parse_document(html);
    let mut ordered: Vec<&ExtractionRule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.priority);

    for rule in ordered {
        let Some(el) = extract::locate(&doc, &rule.locator) else {
            continue;
        };
        for (key, value) in extract::raw_pairs(rule.source_kind, el) {
            if !is_valid_attribute_name(&key) {
                continue;
            }
            let key = normalize_attribute_name(&key);
            if key.is_empty() {
                continue;
            }
            attributes.entry(key).or_insert(value);
        }
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_PAGE: &str = r#"
        <html><body>
          <div id="productOverview_feature_div">
            <table id="overview">
              <tr><td>Brand</td><td>Acme</td></tr>
              <tr><td>Screen Size</td><td>15.6 Inches</td></tr>
              <tr><td>Color</td><td>Silver</td></tr>
            </table>
          </div>
          <table class="prodDetTable">
            <tr><th>Item Weight</th><td>2 kg</td></tr>
            <tr><th>Brand</th><td>Otra marca</td></tr>
          </table>
          <script>var x = {a: 1};</script>
          <dl><dt>Model Name</dt><dd>X1</dd><dt>Year</dt><dd>2024</dd></dl>
        </body></html>
    "#;

    const NOISE_PAGE: &str = r#"
        <html><body>
          <table class="ads">
            <tr><td>function(x){return x}</td><td>1</td></tr>
            <tr><td>var a = 2</td><td>2</td></tr>
            <tr><td>window.foo</td><td>3</td></tr>
            <tr><td>Brand</td><td>Acme</td></tr>
          </table>
        </body></html>
    "#;

    fn table_rule(id: &str) -> ExtractionRule {
        ExtractionRule::new(
            SourceKind::Table,
            Locator::Id {
                tag: "table".into(),
                id: id.into(),
            },
            vec!["Brand".into()],
        )
    }

    fn page(url: &str, rules: Vec<ExtractionRule>) -> PageAnalysis {
        PageAnalysis {
            url: url.into(),
            success: true,
            error: None,
            rules,
        }
    }

    #[test]
    fn analyze_encuentra_tablas_y_listas() {
        let a = analyze(PRODUCT_PAGE, "u", &LearnerConfig::default());
        assert!(a.success);

        let kinds: Vec<SourceKind> = a.rules.iter().map(|r| r.source_kind).collect();
        assert!(kinds.contains(&SourceKind::Table));
        assert!(kinds.contains(&SourceKind::DefinitionList));
        assert!(a
            .rules
            .iter()
            .any(|r| r.locator == Locator::Id { tag: "table".into(), id: "overview".into() }));

        // orden por estabilidad del localizador
        let priorities: Vec<u8> = a.rules.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn analyze_descarta_tablas_de_ruido() {
        let a = analyze(NOISE_PAGE, "u", &LearnerConfig::default());
        assert!(a.success);
        assert!(a.rules.is_empty());
    }

    #[test]
    fn analyze_falla_sin_markup() {
        let cfg = LearnerConfig::default();
        assert!(!analyze("", "u", &cfg).success);
        assert!(!analyze("   \n", "u", &cfg).success);
        let a = analyze("solo texto", "u", &cfg);
        assert!(!a.success);
        assert!(a.error.is_some());
    }

    #[test]
    fn learn_rankea_por_frecuencia() {
        let common = table_rule("tech");
        let rare = table_rule("rare");
        let analyses = vec![
            page("1", vec![rare.clone(), common.clone()]),
            page("2", vec![common.clone()]),
            page("3", vec![common.clone()]),
            page("4", vec![common.clone()]),
            page("5", vec![]),
        ];

        let set = learn(&analyses, "Laptops", &LearnerConfig::default());
        assert!(set.patterns_found);
        assert_eq!(set.analyzed_sample_count, 5);
        assert_eq!(set.rules[0].locator, common.locator);
        assert_eq!(set.rules[0].frequency, 4);
        assert!((set.rules[0].confidence - 0.8).abs() < 1e-9);
        assert!((set.rules[1].confidence - 0.2).abs() < 1e-9);
        assert!(set.rules[0].confidence > set.rules[1].confidence);
    }

    #[test]
    fn learn_respeta_max_rules_y_categoria_vacia() {
        let rules: Vec<ExtractionRule> = (0..8).map(|i| table_rule(&format!("t{i}"))).collect();
        let set = learn(&[page("1", rules)], "X", &LearnerConfig::default());
        assert_eq!(set.rules.len(), 5);
        // empate: primero visto primero
        assert_eq!(set.rules[0].locator, table_rule("t0").locator);

        let empty = learn(&[page("1", vec![])], "Y", &LearnerConfig::default());
        assert!(!empty.patterns_found);
        assert!(empty.rules.is_empty());

        let failed = PageAnalysis::failed("2", "empty document");
        let set = learn(&[failed], "Z", &LearnerConfig::default());
        assert!(!set.patterns_found);
    }

    #[test]
    fn apply_es_determinista_e_idempotente() {
        let cfg = LearnerConfig::default();
        let set = learn(&[analyze(PRODUCT_PAGE, "u", &cfg)], "Laptops", &cfg);

        let first = apply(PRODUCT_PAGE, &set.rules);
        let second = apply(PRODUCT_PAGE, &set.rules);
        assert_eq!(first, second);

        assert_eq!(first.get("screen_size").map(String::as_str), Some("15.6 Inches"));
        assert_eq!(first.get("item_weight").map(String::as_str), Some("2 kg"));
        assert_eq!(first.get("model_name").map(String::as_str), Some("X1"));
        // CSS keyword nunca es clave
        assert!(!first.contains_key("color"));
        // la regla por id gana a la regla por class
        assert_eq!(first.get("brand").map(String::as_str), Some("Acme"));
    }

    #[test]
    fn apply_ignora_contenedores_ausentes() {
        let rules = vec![table_rule("no-existe")];
        assert!(apply(PRODUCT_PAGE, &rules).is_empty());
        assert!(apply("", &rules).is_empty());
    }

    #[test]
    fn bullets_y_divs_etiquetados() {
        let html = r#"
            <html><body>
              <div id="detailBullets_feature_div">
                <ul class="a-unordered-list a-nostyle a-vertical a-spacing-none detail-bullet-list">
                  <li><span class="a-list-item"><span class="a-text-bold">Manufacturer :</span><span>Acme Corp</span></span></li>
                  <li><span class="a-list-item"><span class="a-text-bold">Item model number :</span><span>AC-1</span></span></li>
                </ul>
              </div>
            </body></html>
        "#;
        let cfg = LearnerConfig::default();
        let a = analyze(html, "u", &cfg);
        assert!(a.rules.iter().any(|r| r.source_kind == SourceKind::BulletList));
        assert!(a.rules.iter().any(|r| r.source_kind == SourceKind::LabelledDiv));

        let attrs = apply(html, &a.rules);
        assert_eq!(attrs.get("manufacturer").map(String::as_str), Some("Acme Corp"));
        assert_eq!(attrs.get("item_model_number").map(String::as_str), Some("AC-1"));
    }

    #[test]
    fn fichas_de_libro_en_lista_ordenada() {
        let html = r#"
            <html><body>
              <ol class="a-carousel">
                <li><div class="rpi-attribute-label"><span>Print length</span></div>
                    <div class="rpi-attribute-value"><span>352 pages</span></div></li>
                <li><div class="rpi-attribute-label">Language</div>
                    <div class="rpi-attribute-value">English</div></li>
                <li><div class="rpi-attribute-label">Publisher</div>
                    <div class="rpi-attribute-value">Acme Books</div></li>
                <li><div>sin etiqueta</div></li>
              </ol>
              <ol><li>Paso uno</li></ol>
            </body></html>
        "#;
        let cfg = LearnerConfig::default();
        let a = analyze(html, "u", &cfg);
        let lists: Vec<&ExtractionRule> = a
            .rules
            .iter()
            .filter(|r| r.source_kind == SourceKind::AttributeList)
            .collect();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].sample_keys, vec!["Print length", "Language", "Publisher"]);

        let attrs = apply(html, &a.rules);
        assert_eq!(attrs.get("print_length").map(String::as_str), Some("352 pages"));
        assert_eq!(attrs.get("publisher").map(String::as_str), Some("Acme Books"));
    }

    #[test]
    fn muestra_de_claves_es_por_contenedor() {
        let html = r#"
            <table id="specs">
              <tr><td>Brand</td><td>Acme</td></tr>
              <tr><td>Model Name</td><td>X1</td></tr>
              <tr><td>Screen Size</td><td>15 in</td></tr>
              <tr><td>Item Weight</td><td>2 kg</td></tr>
              <tr><td>Year</td><td>2024</td></tr>
              <tr><td>var a = 1</td><td>-</td></tr>
              <tr><td>window.foo</td><td>-</td></tr>
              <tr><td>document.bar</td><td>-</td></tr>
              <tr><td>let z</td><td>-</td></tr>
              <tr><td>return q</td><td>-</td></tr>
            </table>
        "#;
        // con la muestra por defecto sólo se miran las 5 primeras claves
        let a = analyze(html, "u", &LearnerConfig::default());
        assert_eq!(a.rules.len(), 1);

        let wide = LearnerConfig {
            sample_size: 10,
            ..LearnerConfig::default()
        };
        assert!(analyze(html, "u", &wide).rules.is_empty());
    }
}
