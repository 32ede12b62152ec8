//! SVG sprite sheet assembly.
//!
//! Each icon is cleaned up and wrapped into a `<symbol>` whose `id` is the
//! icon's file stem, so a page can reference it with
//! `<use href="sprite.svg#icon"/>`. Identifiers inside an icon (gradients,
//! clip paths, masks) become `<symbol>.<id>`. Symbol ids never contain a
//! dot, so the two kinds can't collide once all icons share one document.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{Adapter, Completion, Extensions, Job, write_output};
use crate::core::Hash32;
use crate::error::AdapterError;
use crate::source::Sources;

static RE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->|<metadata\b.*?</metadata>")
        .expect("valid regex")
});

static RE_BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

static RE_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<svg\b([^>]*?)(/?)>").expect("valid regex"));

static RE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][\w:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static RE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sid\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

static RE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<attr>\sid\s*=\s*["'])(?P<id>[^"']+)(?P<end>["'])|url\(\s*#(?P<url>[^)\s]+)\s*\)|(?P<href>\s(?:xlink:)?href\s*=\s*["'])#(?P<hid>[^"']+)(?P<hend>["'])"#,
    )
    .expect("valid regex")
});

static RE_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?P<open><style\b[^>]*>)(?P<css>.*?)(?P<close></style\s*>)")
        .expect("valid regex")
});

static RE_SELECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"url\([^)]*\)|#(?P<id>-?[A-Za-z_][\w-]*)").expect("valid regex")
});

/// Root attributes that make no sense on a `<symbol>`.
const DROPPED_ATTRS: &[&str] = &[
    "width",
    "height",
    "x",
    "y",
    "id",
    "version",
    "xml:space",
    "enable-background",
];

/// Combines every matched SVG file into one sprite sheet.
#[derive(Debug, Clone)]
pub struct Sprite {
    file_name: String,
}

impl Sprite {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl Default for Sprite {
    fn default() -> Self {
        Self::new("sprite.svg")
    }
}

impl Adapter for Sprite {
    fn name(&self) -> &'static str {
        "svgstore"
    }

    fn produces(&self, _: &Sources) -> Extensions {
        Extensions::only(["svg"])
    }

    fn apply(&self, job: &Job<'_>) -> Result<Completion, AdapterError> {
        let mut used = HashSet::new();
        let mut sheet = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg">"#);

        for file in job.sources.expand()? {
            let text = std::fs::read_to_string(&file.path)?;
            let stem = file.path.file_stem().unwrap_or("icon");

            let id = unique_id(&mut used, sanitize_id(stem), file.path.as_str());

            let symbol = symbolize(&id, &text).map_err(|e| AdapterError::input(&file.path, e))?;
            sheet.push_str(&symbol);
        }

        sheet.push_str("</svg>");

        let path = job.dest.join(&self.file_name);
        write_output(&path, sheet)?;

        Ok(Completion {
            written: vec![path],
        })
    }
}

/// Reserves `base`, or a variant of it when another icon already took it.
fn unique_id(used: &mut HashSet<String>, base: String, path: &str) -> String {
    if used.insert(base.clone()) {
        return base;
    }

    let hash = Hash32::hash(path).to_hex();
    let mut id = format!("{base}-{}", &hash[..8]);
    let mut n = 2;

    while !used.insert(id.clone()) {
        id = format!("{base}-{}-{n}", &hash[..8]);
        n += 1;
    }

    id
}

/// Turns an icon's file stem into a valid XML id without dots.
fn sanitize_id(stem: &str) -> String {
    let mut id: String = stem
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            true => c,
            false => '-',
        })
        .collect();

    if !id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        id.insert(0, '_');
    }

    id
}

/// Converts a whole SVG document into a `<symbol>` element.
fn symbolize(id: &str, text: &str) -> Result<String, &'static str> {
    let text = RE_NOISE.replace_all(text, "");
    let text = RE_BETWEEN_TAGS.replace_all(text.trim(), "><");

    let root = RE_ROOT.captures(&text).ok_or("missing <svg> root element")?;
    let open = root.get(0).ok_or("missing <svg> root element")?;
    let self_closing = !root[2].is_empty();

    let inner = match self_closing {
        true => "",
        false => {
            let close = text.rfind("</svg>").ok_or("unclosed <svg> root element")?;
            if close < open.end() {
                return Err("unclosed <svg> root element");
            }
            &text[open.end()..close]
        }
    };

    let attrs = symbol_attrs(&root[1]);
    let inner = prefix_ids(id, inner);

    Ok(format!(r#"<symbol id="{id}"{attrs}>{inner}</symbol>"#))
}

/// Keeps the presentational root attributes and derives a `viewBox` from the
/// dimensions when it is missing.
fn symbol_attrs(raw: &str) -> String {
    let mut attrs = String::new();
    let mut view_box = false;
    let mut width = None;
    let mut height = None;

    for cap in RE_ATTR.captures_iter(raw) {
        let name = &cap[1];
        let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());

        match name {
            "width" => width = Some(value.trim_end_matches("px").to_string()),
            "height" => height = Some(value.trim_end_matches("px").to_string()),
            "viewBox" => view_box = true,
            _ => {}
        }

        if name == "xmlns" || name.starts_with("xmlns:") || DROPPED_ATTRS.contains(&name) {
            continue;
        }

        attrs.push_str(&format!(r#" {name}="{value}""#));
    }

    if !view_box
        && let (Some(w), Some(h)) = (width, height)
        && w.parse::<f64>().is_ok()
        && h.parse::<f64>().is_ok()
    {
        attrs.push_str(&format!(r#" viewBox="0 0 {w} {h}""#));
    }

    attrs
}

/// Prefixes every id declared inside the icon and rewrites local references
/// to them, including selectors in `<style>` blocks. References to ids the
/// icon doesn't declare are left alone.
fn prefix_ids(prefix: &str, inner: &str) -> String {
    let ids: HashMap<&str, String> = RE_ID
        .captures_iter(inner)
        .filter_map(|cap| cap.get(1))
        .map(|m| (m.as_str(), format!("{prefix}.{}", m.as_str())))
        .collect();

    if ids.is_empty() {
        return inner.to_string();
    }

    let inner = RE_REF
        .replace_all(inner, |cap: &Captures| {
            let whole = &cap[0];

            if let Some(old) = cap.name("id") {
                return match ids.get(old.as_str()) {
                    Some(new) => format!("{}{new}{}", &cap["attr"], &cap["end"]),
                    None => whole.to_string(),
                };
            }

            if let Some(old) = cap.name("url") {
                return match ids.get(old.as_str()) {
                    Some(new) => format!("url(#{new})"),
                    None => whole.to_string(),
                };
            }

            if let Some(old) = cap.name("hid") {
                return match ids.get(old.as_str()) {
                    Some(new) => format!("{}#{new}{}", &cap["href"], &cap["hend"]),
                    None => whole.to_string(),
                };
            }

            whole.to_string()
        })
        .into_owned();

    RE_STYLE
        .replace_all(&inner, |cap: &Captures| {
            let css = RE_SELECTOR.replace_all(&cap["css"], |sel: &Captures| {
                match sel.name("id").and_then(|old| ids.get(old.as_str())) {
                    Some(new) => format!("#{}", new.replace('.', "\\.")),
                    None => sel[0].to_string(),
                }
            });
            format!("{}{css}{}", &cap["open"], &cap["close"])
        })
        .into_owned()
}
