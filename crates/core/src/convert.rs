//! YAML <-> JSON translation for manifests, patches and rendered output.
//!
//! Reading follows the YAML 1.1 scalar rules kubectl applies: plain `0644` is the octal
//! number 420, plain `yes`/`off` are booleans, `~` is null. Quoted scalars always stay
//! strings. Anchors, aliases and `<<` merge keys are expanded. Comments and key order are
//! not preserved. Splitting a multi-document stream is the caller's job.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value as Json};
use yaml_rust2::parser::{Event, EventReceiver, Parser, Tag};
use yaml_rust2::scanner::TScalarStyle;

use crate::{Error, Result};

/// Parse one YAML document into a JSON value. Empty input yields `null`.
pub fn yaml_to_value(input: &str) -> Result<Json> {
    let mut builder = Builder::default();
    Parser::new_from_str(input)
        .load(&mut builder, true)
        .map_err(|e| Error::Validation(format!("parsing YAML: {}", e)))?;
    builder.finish()
}

/// Serialize a JSON value as a single YAML document (no leading `---`).
pub fn value_to_yaml(value: &Json) -> Result<String> {
    let yaml = serde_yaml::to_string(value).map_err(|e| Error::Encode(e.to_string()))?;
    // the serializer leaves strings such as `on` or `0x1f` unquoted
    if yaml_to_value(&yaml).ok().as_ref() == Some(value) {
        return Ok(yaml);
    }
    let mut json = serde_json::to_string_pretty(value).map_err(|e| Error::Encode(e.to_string()))?;
    json.push('\n');
    Ok(json)
}

pub fn yaml_to_json(input: &[u8]) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(input).map_err(|e| Error::Validation(format!("YAML is not UTF-8: {}", e)))?;
    let value = yaml_to_value(text)?;
    serde_json::to_vec(&value).map_err(|e| Error::Encode(e.to_string()))
}

pub fn json_to_yaml(input: &[u8]) -> Result<Vec<u8>> {
    let value: Json =
        serde_json::from_slice(input).map_err(|e| Error::Validation(format!("parsing JSON: {}", e)))?;
    value_to_yaml(&value).map(String::into_bytes)
}

/// Resolve an untagged plain scalar.
pub fn resolve_plain(s: &str) -> Json {
    match s {
        "" | "~" | "null" | "Null" | "NULL" => return Json::Null,
        "y" | "Y" | "yes" | "Yes" | "YES" | "true" | "True" | "TRUE" | "on" | "On" | "ON" => return Json::Bool(true),
        "n" | "N" | "no" | "No" | "NO" | "false" | "False" | "FALSE" | "off" | "Off" | "OFF" => {
            return Json::Bool(false)
        }
        _ => {}
    }
    if !s.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
        return Json::String(s.to_string());
    }
    let plain = s.replace('_', "");
    if let Some(n) = parse_int(&plain) {
        return n;
    }
    if float_pattern().map_or(false, |re| re.is_match(&plain)) {
        if let Some(n) = plain.parse::<f64>().ok().and_then(Number::from_f64) {
            return Json::Number(n);
        }
    }
    Json::String(s.to_string())
}

fn float_pattern() -> Option<&'static Regex> {
    static FLOAT: OnceLock<Option<Regex>> = OnceLock::new();
    FLOAT
        .get_or_init(|| Regex::new(r"^[-+]?(\.[0-9]+|[0-9]+(\.[0-9]*)?)([eE][-+]?[0-9]+)?$").ok())
        .as_ref()
}

/// Decimal, `0x` hex, `0o` or leading-zero octal, and `0b` binary integers.
fn parse_int(s: &str) -> Option<Json> {
    let (negative, body) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (digits, radix) = if let Some(h) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (h, 16)
    } else if let Some(o) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        (o, 8)
    } else if let Some(b) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        (b, 2)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8)
    } else {
        (body, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = u64::from_str_radix(digits, radix).ok()?;
    if !negative {
        return Some(Json::from(magnitude));
    }
    if magnitude == i64::MIN.unsigned_abs() {
        return Some(Json::from(i64::MIN));
    }
    i64::try_from(magnitude).ok().map(|m| Json::from(-m))
}

fn is_core_tag(tag: &Tag) -> bool {
    tag.handle == "!!" || tag.handle == "tag:yaml.org,2002:"
}

fn resolve_tagged(value: String, tag: &Tag) -> std::result::Result<Json, String> {
    if !is_core_tag(tag) {
        return Ok(Json::String(value));
    }
    let resolved = resolve_plain(&value);
    let ok = match tag.suffix.as_str() {
        "str" => return Ok(Json::String(value)),
        "null" => resolved.is_null(),
        "bool" => resolved.is_boolean(),
        "int" => resolved.is_i64() || resolved.is_u64(),
        "float" => resolved.is_number(),
        _ => return Ok(Json::String(value)),
    };
    if ok {
        Ok(resolved)
    } else {
        Err(format!("{:?} is not a valid !!{}", value, tag.suffix))
    }
}

/// JSON object keys are strings; other scalar keys are rendered the way kubectl does.
fn key_string(key: Json) -> std::result::Result<String, String> {
    match key {
        Json::String(s) => Ok(s),
        Json::Null => Ok("null".to_string()),
        Json::Bool(b) => Ok(b.to_string()),
        Json::Number(n) => Ok(n.to_string()),
        Json::Array(_) | Json::Object(_) => Err("mapping keys must be scalars".to_string()),
    }
}

const MERGE_KEY: &str = "<<";

enum Frame {
    Seq { items: Vec<Json>, anchor: usize },
    Map { entries: Map<String, Json>, key: Option<String>, merges: Vec<Json>, anchor: usize },
}

#[derive(Default)]
struct Builder {
    stack: Vec<Frame>,
    anchors: HashMap<usize, Json>,
    documents: usize,
    root: Option<Json>,
    error: Option<String>,
}

impl Builder {
    fn finish(self) -> Result<Json> {
        if let Some(e) = self.error {
            return Err(Error::Validation(format!("parsing YAML: {}", e)));
        }
        if self.documents > 1 {
            return Err(Error::Validation(format!(
                "expected a single YAML document, found {}",
                self.documents
            )));
        }
        Ok(self.root.unwrap_or(Json::Null))
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn complete(&mut self, value: Json, anchor: usize) {
        if anchor > 0 {
            self.anchors.insert(anchor, value.clone());
        }
        let mut error = None;
        match self.stack.last_mut() {
            None => self.root = Some(value),
            Some(Frame::Seq { items, .. }) => items.push(value),
            Some(Frame::Map { entries, key, merges, .. }) => match key.take() {
                None => match key_string(value) {
                    Ok(k) => *key = Some(k),
                    Err(e) => error = Some(e),
                },
                Some(k) if k == MERGE_KEY => merges.push(value),
                Some(k) => {
                    entries.insert(k, value);
                }
            },
        }
        if let Some(e) = error {
            self.fail(e);
        }
    }

    fn close_map(&mut self, mut entries: Map<String, Json>, merges: Vec<Json>) -> Json {
        // explicit keys win over merged ones; earlier merge sources win over later ones
        for source in merges {
            let sources = match source {
                Json::Array(items) => items,
                other => vec![other],
            };
            for src in sources {
                match src {
                    Json::Object(map) => {
                        for (k, v) in map {
                            entries.entry(k).or_insert(v);
                        }
                    }
                    _ => self.fail("merge key value must be a mapping or a sequence of mappings".to_string()),
                }
            }
        }
        Json::Object(entries)
    }
}

impl EventReceiver for Builder {
    fn on_event(&mut self, ev: Event) {
        if self.error.is_some() {
            return;
        }
        match ev {
            Event::DocumentStart { .. } => self.documents += 1,
            Event::Scalar(value, style, anchor, tag) => {
                let resolved = match (&tag, style) {
                    (Some(t), _) => resolve_tagged(value, t),
                    (None, TScalarStyle::Plain) => Ok(resolve_plain(&value)),
                    (None, _) => Ok(Json::String(value)),
                };
                match resolved {
                    Ok(v) => self.complete(v, anchor),
                    Err(e) => self.fail(e),
                }
            }
            Event::SequenceStart(anchor, ..) => self.stack.push(Frame::Seq { items: Vec::new(), anchor }),
            Event::MappingStart(anchor, ..) => self.stack.push(Frame::Map {
                entries: Map::new(),
                key: None,
                merges: Vec::new(),
                anchor,
            }),
            Event::SequenceEnd => {
                if let Some(Frame::Seq { items, anchor }) = self.stack.pop() {
                    self.complete(Json::Array(items), anchor);
                }
            }
            Event::MappingEnd => {
                if let Some(Frame::Map { entries, merges, anchor, .. }) = self.stack.pop() {
                    let value = self.close_map(entries, merges);
                    self.complete(value, anchor);
                }
            }
            Event::Alias(id) => match self.anchors.get(&id).cloned() {
                Some(v) => self.complete(v, 0),
                None => self.fail(format!("unknown alias id {}", id)),
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_round_trip_is_semantically_equal() {
        let original = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "labels": { "app": "web" } },
            "spec": {
                "replicas": 3,
                "paused": false,
                "template": { "spec": { "containers": [
                    { "name": "web", "image": "nginx:1.25", "args": ["--port", "8080"], "resources": null }
                ] } }
            }
        });
        let bytes = serde_json::to_vec(&original).unwrap();
        let yaml = json_to_yaml(&bytes).unwrap();
        let back: Json = serde_json::from_slice(&yaml_to_json(&yaml).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn numeric_looking_strings_survive() {
        // "1.25" and "true" must stay strings after a trip through YAML
        let original = json!({ "data": { "version": "1.25", "enabled": "true", "port": 8080 } });
        let yaml = value_to_yaml(&original).unwrap();
        assert_eq!(yaml_to_value(&yaml).unwrap(), original);
    }

    #[test]
    fn plain_octal_and_booleans_follow_kubectl() {
        let v = yaml_to_value(
            "defaultMode: 0644\nquotedMode: \"0644\"\nenabled: yes\nquotedEnabled: 'yes'\ndebug: off\n\
             hex: 0x1F\nmode: 0o644\nempty: ~\nbig: 1_000\nratio: 1.5\ntagged: !!str 0644\n",
        )
        .unwrap();
        assert_eq!(v["defaultMode"], json!(420));
        assert_eq!(v["quotedMode"], json!("0644"));
        assert_eq!(v["enabled"], json!(true));
        assert_eq!(v["quotedEnabled"], json!("yes"));
        assert_eq!(v["debug"], json!(false));
        assert_eq!(v["hex"], json!(31));
        assert_eq!(v["mode"], json!(420));
        assert_eq!(v["empty"], Json::Null);
        assert_eq!(v["big"], json!(1000));
        assert_eq!(v["ratio"], json!(1.5));
        assert_eq!(v["tagged"], json!("0644"));
    }

    #[test]
    fn ordinary_strings_stay_strings() {
        for s in ["nginx:1.25", "1.2.3", "v1", "-", "2001-12-14", "0.0.0.0/0", ".inf", "08:00"] {
            assert_eq!(resolve_plain(s), json!(s), "{}", s);
        }
        assert_eq!(resolve_plain("-42"), json!(-42));
        assert_eq!(resolve_plain("18446744073709551615"), json!(u64::MAX));
        assert_eq!(resolve_plain("1e3"), json!(1000.0));
    }

    #[test]
    fn block_scalars_and_keys() {
        let v = yaml_to_value("script: |\n  echo 0644\ndata:\n  on: 1\n  \"no\": 2\n  3: x\n").unwrap();
        assert_eq!(v["script"], json!("echo 0644\n"));
        assert_eq!(v["data"], json!({ "true": 1, "no": 2, "3": "x" }));
    }

    #[test]
    fn anchors_aliases_and_merge_keys_expand() {
        let v = yaml_to_value(
            "base: &base\n  app: web\n  tier: front\nlabels:\n  <<: *base\n  tier: back\ncopy: *base\n",
        )
        .unwrap();
        assert_eq!(v["labels"], json!({ "app": "web", "tier": "back" }));
        assert_eq!(v["copy"], json!({ "app": "web", "tier": "front" }));
    }

    #[test]
    fn ambiguous_strings_render_back_unchanged() {
        let original = json!({ "a": "on", "b": "0x1F", "c": "y", "d": "0644", "e": "plain" });
        let yaml = value_to_yaml(&original).unwrap();
        assert_eq!(yaml_to_value(&yaml).unwrap(), original);
    }

    #[test]
    fn flow_style_patch_parses() {
        let v = yaml_to_value("spec: {replicas: 3}").unwrap();
        assert_eq!(v, json!({ "spec": { "replicas": 3 } }));
        let v = yaml_to_value(r#"[{"op":"replace","path":"/spec/replicas","value":3}]"#).unwrap();
        assert_eq!(v[0]["op"], "replace");
    }

    #[test]
    fn empty_document_is_null() {
        assert_eq!(yaml_to_value("").unwrap(), Json::Null);
        assert_eq!(yaml_to_value("# only a comment\n").unwrap(), Json::Null);
    }

    #[test]
    fn malformed_yaml_is_validation_error() {
        let err = yaml_to_value("spec: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{:?}", err);
        let err = yaml_to_value("mode: !!int abc\n").unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{:?}", err);
    }

    #[test]
    fn multi_document_input_is_rejected() {
        assert!(yaml_to_value("a: 1\n---\nb: 2\n").is_err());
    }
}
