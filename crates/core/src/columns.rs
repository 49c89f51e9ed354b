//! Output rendering: YAML document streams and custom-column tables.
//!
//! Column spec syntax is `HEADER:PATH[,HEADER:PATH...]`, e.g.
//! `NAME:.metadata.name,IMAGE:.spec.containers[0].image`. Every path is parsed before any
//! row is rendered, so a bad path never produces a partial table.

use serde_json::Value as Json;

use crate::convert::value_to_yaml;
use crate::fieldpath::FieldPath;
use crate::{Error, ResourceObject, Result};

/// Cell text for a path that resolves to nothing.
pub const NONE_CELL: &str = "<none>";

/// Separator between documents in a rendered YAML stream.
pub const DOC_SEPARATOR: &str = "---\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomColumn {
    pub header: String,
    pub path: FieldPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomColumnSpec {
    columns: Vec<CustomColumn>,
}

impl CustomColumnSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for entry in split_entries(spec) {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(Error::Validation(format!("custom columns {:?}: empty column entry", spec)));
            }
            let Some((header, path)) = entry.split_once(':') else {
                return Err(Error::Validation(format!(
                    "custom columns: entry {:?} is not HEADER:PATH",
                    entry
                )));
            };
            pairs.push((header, path));
        }
        Self::from_pairs(&pairs)
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::Validation("custom columns: no columns given".into()));
        }
        let mut columns = Vec::with_capacity(pairs.len());
        for (header, path) in pairs {
            let header = header.trim();
            let path = path.trim();
            if header.is_empty() {
                return Err(Error::Validation(format!("custom columns: empty header for path {:?}", path)));
            }
            if path.is_empty() {
                return Err(Error::Validation(format!("custom columns: empty path for header {:?}", header)));
            }
            columns.push(CustomColumn { header: header.to_string(), path: FieldPath::parse(path)? });
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[CustomColumn] {
        &self.columns
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.header.as_str())
    }
}

/// Split on top-level commas; commas inside `[...]`, `{...}` or quotes belong to the path.
fn split_entries(spec: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in spec.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[' | '{') => depth += 1,
            (None, ']' | '}') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                out.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&spec[start..]);
    out
}

/// Text for one cell: strings raw, scalars canonical, containers as compact JSON.
pub fn render_cell(value: Option<&Json>) -> String {
    let text = match value {
        None | Some(Json::Null) => return NONE_CELL.to_string(),
        Some(Json::String(s)) if s.is_empty() => return NONE_CELL.to_string(),
        Some(Json::String(s)) => s.clone(),
        Some(Json::Bool(b)) => b.to_string(),
        Some(Json::Number(n)) => n.to_string(),
        Some(v @ (Json::Array(_) | Json::Object(_))) => v.to_string(),
    };
    // keep one row per line and one cell per tab stop
    if text.contains(['\t', '\n', '\r']) {
        text.replace(['\t', '\n', '\r'], " ")
    } else {
        text
    }
}

/// Tab-separated table: a header row, then one row per object, each line `\n`-terminated.
pub fn render_custom_columns(objects: &[ResourceObject], spec: &CustomColumnSpec) -> String {
    let mut out = String::new();
    out.push_str(&spec.headers().collect::<Vec<_>>().join("\t"));
    out.push('\n');
    for obj in objects {
        let row: Vec<String> =
            spec.columns().iter().map(|c| render_cell(c.path.extract(obj.as_value()))).collect();
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

/// Parse `spec` and render; a malformed spec fails before any row is produced.
pub fn render_columns(objects: &[ResourceObject], spec: &str) -> Result<String> {
    let spec = CustomColumnSpec::parse(spec)?;
    Ok(render_custom_columns(objects, &spec))
}

/// Each object as a YAML document, joined by `---\n`, in input order.
pub fn render_yaml(objects: &[ResourceObject]) -> Result<String> {
    let mut docs = Vec::with_capacity(objects.len());
    for obj in objects {
        docs.push(value_to_yaml(obj.as_value())?);
    }
    Ok(docs.join(DOC_SEPARATOR))
}
