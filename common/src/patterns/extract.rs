//! Recorrido del DOM: localizar contenedores y sacar pares clave/valor crudos.
//!
//! No se construyen selectores CSS a partir de atributos de la página
//! (un id con caracteres raros rompería el parseo); todo se resuelve
//! recorriendo descendientes y comparando nombre de tag y atributos.

use scraper::{ElementRef, Html, Node};

use super::{Locator, SourceKind};

/// Claves de 100+ caracteres no son candidatas.
pub const MAX_KEY_LEN: usize = 100;

/// Subcadenas de id/class que marcan un contenedor de especificaciones.
pub const CONTAINER_HINTS: &[&str] = &["spec", "detail", "attribute", "feature"];

const ATTRIBUTE_LABEL: &str = "rpi-attribute-label";
const ATTRIBUTE_VALUE: &str = "rpi-attribute-value";

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const BLOCK_TAGS: &[&str] = &[
    "div", "p", "li", "tr", "br", "dt", "dd", "ul", "ol", "table", "section", "h1", "h2", "h3",
    "h4", "h5", "h6",
];

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200b}'..='\u{200f}' | '\u{202a}'..='\u{202e}' | '\u{feff}')
}

/// Colapsa espacios y quita caracteres de ancho cero / marcas de dirección.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !is_invisible(*c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_text(el: ElementRef<'_>, out: &mut String, break_blocks: bool) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => {
                let name = e.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let block = break_blocks && BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                push_text(child_el, out, break_blocks);
                if block {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Texto visible de un elemento, sin scripts ni estilos.
pub fn element_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(el, &mut raw, false);
    clean_text(&raw)
}

/// Texto visible partido en líneas en los límites de bloque.
pub fn element_lines(el: ElementRef<'_>) -> Vec<String> {
    let mut raw = String::new();
    push_text(el, &mut raw, true);
    raw.lines()
        .map(clean_text)
        .filter(|l| !l.is_empty())
        .collect()
}

fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

fn attr_contains(el: ElementRef<'_>, attr: &str, needle: &str) -> bool {
    el.value()
        .attr(attr)
        .map(|v| v.to_lowercase().contains(needle))
        .unwrap_or(false)
}

/// Descendientes (incluido el propio elemento) con un nombre de tag dado.
pub fn descendants_named<'a>(
    el: ElementRef<'a>,
    name: &'a str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(move |e| e.value().name() == name)
}

fn next_element_sibling(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

/// Localizador más estable disponible: id, luego class, luego posición
/// entre todos los elementos del mismo tag en orden de documento.
pub fn locator_for(el: ElementRef<'_>, position: usize) -> Locator {
    let tag = el.value().name().to_string();
    if let Some(id) = el.value().id().filter(|id| !id.trim().is_empty()) {
        return Locator::Id {
            tag,
            id: id.to_string(),
        };
    }
    if let Some(class) = el.value().attr("class").filter(|c| !c.trim().is_empty()) {
        return Locator::Class {
            tag,
            class: class.to_string(),
        };
    }
    Locator::Position {
        tag,
        index: position,
    }
}

/// Vuelve a encontrar en `doc` el elemento descrito por `locator`.
pub fn locate<'a>(doc: &'a Html, locator: &'a Locator) -> Option<ElementRef<'a>> {
    let mut candidates = descendants_named(doc.root_element(), locator.tag());
    match locator {
        Locator::Id { id, .. } => candidates.find(|e| e.value().id() == Some(id.as_str())),
        Locator::Class { class, .. } => {
            candidates.find(|e| e.value().attr("class") == Some(class.as_str()))
        }
        Locator::Position { index, .. } => candidates.nth(*index),
    }
}

/// Contenedores candidatos de un documento con su posición por tag.
pub fn containers<'a>(doc: &'a Html, kind: SourceKind) -> Vec<(usize, ElementRef<'a>)> {
    let root = doc.root_element();
    match kind {
        SourceKind::Table => descendants_named(root, "table").enumerate().collect(),
        SourceKind::DefinitionList => descendants_named(root, "dl").enumerate().collect(),
        SourceKind::BulletList => descendants_named(root, "ul")
            .enumerate()
            .filter(|(_, ul)| attr_contains(*ul, "class", "detail-bullet-list"))
            .collect(),
        SourceKind::AttributeList => descendants_named(root, "ol")
            .enumerate()
            .filter(|(_, ol)| {
                descendants_named(*ol, "div").any(|d| attr_contains(d, "class", ATTRIBUTE_LABEL))
            })
            .collect(),
        SourceKind::LabelledDiv => {
            let divs: Vec<(usize, ElementRef<'a>)> =
                descendants_named(root, "div").enumerate().collect();
            let mut picked: Vec<(usize, ElementRef<'a>)> = Vec::new();
            for hint in CONTAINER_HINTS {
                let matching = divs
                    .iter()
                    .filter(|(_, d)| attr_contains(*d, "id", hint) || attr_contains(*d, "class", hint))
                    .take(5);
                for (i, d) in matching {
                    if !picked.iter().any(|(j, _)| j == i) {
                        picked.push((*i, *d));
                    }
                }
            }
            picked
        }
    }
}

fn accept_pair(out: &mut Vec<(String, String)>, key: String, value: String) {
    let key = key.trim().to_string();
    let value = value.trim().to_string();
    if key.is_empty() || value.is_empty() || key.chars().count() >= MAX_KEY_LEN {
        return;
    }
    out.push((key, value));
}

fn table_pairs(table: ElementRef<'_>, out: &mut Vec<(String, String)>) {
    for row in descendants_named(table, "tr") {
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "th" | "td"))
            .collect();
        if let [key, value] = cells.as_slice() {
            accept_pair(out, element_text(*key), element_text(*value));
        }
    }
}

fn definition_pairs(dl: ElementRef<'_>, out: &mut Vec<(String, String)>) {
    let terms = descendants_named(dl, "dt");
    let defs = descendants_named(dl, "dd");
    for (dt, dd) in terms.zip(defs) {
        accept_pair(out, element_text(dt), element_text(dd));
    }
}

fn labelled_pairs(div: ElementRef<'_>, out: &mut Vec<(String, String)>) {
    for left in div
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| has_class(*e, "a-col-left"))
    {
        if let Some(right) = next_element_sibling(left).filter(|r| has_class(*r, "a-col-right")) {
            accept_pair(out, element_text(left), element_text(right));
        }
    }

    for span in descendants_named(div, "span")
        .filter(|s| attr_contains(*s, "class", "label") || attr_contains(*s, "class", "key"))
    {
        if let Some(value) = next_element_sibling(span).filter(|v| v.value().name() == "span") {
            accept_pair(out, element_text(span), element_text(value));
        }
    }

    for line in element_lines(div) {
        if let Some((key, value)) = line.split_once(':') {
            accept_pair(out, key.to_string(), value.to_string());
        }
    }
}

fn bullet_pairs(ul: ElementRef<'_>, out: &mut Vec<(String, String)>) {
    for li in descendants_named(ul, "li") {
        for bold in descendants_named(li, "span").filter(|s| has_class(*s, "a-text-bold")) {
            let key = element_text(bold);
            let key = key.trim_end_matches(':').trim().to_string();
            if let Some(value) = next_element_sibling(bold).filter(|v| v.value().name() == "span") {
                accept_pair(out, key, element_text(value));
            }
        }
    }
}

fn attribute_list_pairs(ol: ElementRef<'_>, out: &mut Vec<(String, String)>) {
    for li in descendants_named(ol, "li") {
        let first_with = |class: &str| {
            descendants_named(li, "div").find(|d| attr_contains(*d, "class", class))
        };
        let label = first_with(ATTRIBUTE_LABEL);
        let value = first_with(ATTRIBUTE_VALUE);
        if let (Some(label), Some(value)) = (label, value) {
            accept_pair(out, element_text(label), element_text(value));
        }
    }
}

/// Pares clave/valor crudos (sin filtrar) de un contenedor, en orden de documento.
pub fn raw_pairs(kind: SourceKind, el: ElementRef<'_>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    match kind {
        SourceKind::Table => table_pairs(el, &mut out),
        SourceKind::DefinitionList => definition_pairs(el, &mut out),
        SourceKind::LabelledDiv => labelled_pairs(el, &mut out),
        SourceKind::BulletList => bullet_pairs(el, &mut out),
        SourceKind::AttributeList => attribute_list_pairs(el, &mut out),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first<'a>(doc: &'a Html, tag: &'a str) -> ElementRef<'a> {
        descendants_named(doc.root_element(), tag).next().unwrap()
    }

    #[test]
    fn texto_sin_scripts_ni_invisibles() {
        let doc = Html::parse_fragment(
            "<div>Hola\u{200e} <script>var x = 1;</script><b>mundo</b>\n\t!</div>",
        );
        assert_eq!(element_text(first(&doc, "div")), "Hola mundo !");
    }

    #[test]
    fn lineas_en_limites_de_bloque() {
        let doc = Html::parse_fragment("<div><p>Brand: Acme</p><p>Color: Red</p>x<br>y</div>");
        assert_eq!(
            element_lines(first(&doc, "div")),
            vec!["Brand: Acme", "Color: Red", "x", "y"]
        );
    }

    #[test]
    fn tabla_solo_filas_de_dos_celdas() {
        let doc = Html::parse_document(
            "<table><tr><th>Brand</th><td>Acme</td></tr>\
             <tr><td>a</td><td>b</td><td>c</td></tr>\
             <tr><th>Weight</th><td> 2 kg </td></tr></table>",
        );
        let pairs = raw_pairs(SourceKind::Table, first(&doc, "table"));
        assert_eq!(
            pairs,
            vec![
                ("Brand".to_string(), "Acme".to_string()),
                ("Weight".to_string(), "2 kg".to_string())
            ]
        );
    }

    #[test]
    fn bullets_quitan_dos_puntos() {
        let doc = Html::parse_document(
            "<ul class=\"a-unordered-list detail-bullet-list\">\
             <li><span><span class=\"a-text-bold\">Manufacturer :</span><span>Acme</span></span></li>\
             </ul>",
        );
        let pairs = raw_pairs(SourceKind::BulletList, first(&doc, "ul"));
        assert_eq!(pairs, vec![("Manufacturer".to_string(), "Acme".to_string())]);
    }

    #[test]
    fn locate_por_id_clase_y_posicion() {
        let doc = Html::parse_document(
            "<div id=\"a\"></div><div class=\"x y\"></div><div></div>",
        );
        let divs: Vec<_> = descendants_named(doc.root_element(), "div").collect();

        let by_id = locator_for(divs[0], 0);
        assert_eq!(by_id.priority(), 1);
        let by_class = locator_for(divs[1], 1);
        assert_eq!(by_class.priority(), 2);
        let by_pos = locator_for(divs[2], 2);
        assert_eq!(by_pos.priority(), 3);

        for (loc, el) in [(&by_id, divs[0]), (&by_class, divs[1]), (&by_pos, divs[2])] {
            assert_eq!(locate(&doc, loc).map(|e| e.id()), Some(el.id()));
        }
    }
}
