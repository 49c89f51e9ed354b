//! kube-mcp playbooks: a directory of markdown troubleshooting trees.
//!
//! A playbook is a `*.md` file directly inside the directory. It is listed only when it
//! carries at least one `keywords: "..."` line; the first `# ` heading is its title and a
//! `SUMMARY:` block (up to the next blank line) its summary.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookInfo {
    pub name: String,
    pub keywords: Vec<String>,
    pub summary: String,
    pub title: String,
}

/// Extract the listing entry from file content; `None` when there are no keywords.
pub fn parse_playbook(name: &str, content: &str, keywords_re: &Regex) -> Option<PlaybookInfo> {
    let keywords: Vec<String> = keywords_re
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    if keywords.is_empty() {
        return None;
    }

    let mut title = String::new();
    let mut summary = Vec::new();
    let mut in_summary = false;
    for line in content.lines() {
        let line = line.trim();
        if title.is_empty() {
            if let Some(t) = line.strip_prefix("# ") {
                title = t.trim().to_string();
            }
        }
        if let Some(rest) = line.strip_prefix("SUMMARY:") {
            in_summary = true;
            let rest = rest.trim();
            if !rest.is_empty() {
                summary.push(rest.to_string());
            }
            continue;
        }
        if in_summary {
            if line.is_empty() {
                break;
            }
            summary.push(line.to_string());
        }
    }

    Some(PlaybookInfo { name: name.to_string(), keywords, summary: summary.join(" "), title })
}

#[derive(Debug, Clone)]
pub struct Playbooks {
    dir: PathBuf,
    entries: Vec<PlaybookInfo>,
}

impl Playbooks {
    /// Scan `dir` once (non-recursive). Unreadable files are skipped.
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let keywords_re = Regex::new(r#"keywords:\s*"([^"]*)""#)?;
        let mut entries = Vec::new();
        let read = fs::read_dir(&dir).with_context(|| format!("reading playbook directory {}", dir.display()))?;
        for entry in read {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "playbook unreadable; skipping");
                    continue;
                }
            };
            match parse_playbook(name, &content, &keywords_re) {
                Some(info) => entries.push(info),
                None => debug!(name, "playbook has no keywords; skipping"),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        info!(dir = %dir.display(), count = entries.len(), "playbooks scanned");
        Ok(Self { dir, entries })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> &[PlaybookInfo] {
        &self.entries
    }

    pub fn list_json(&self) -> Result<String> {
        serde_json::to_string(&self.entries).context("encoding playbook list")
    }

    /// Content of `<name>.md`; only the final path component of `name` is used.
    pub fn get(&self, name: &str) -> Result<String> {
        let clean = Path::new(name.trim())
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && *s != "..")
            .ok_or_else(|| anyhow!("invalid playbook name {:?}", name))?;
        let path = self.dir.join(format!("{}.md", clean));
        if !path.is_file() {
            return Err(anyhow!("playbook {:?} not found", clean));
        }
        fs::read_to_string(&path).with_context(|| format!("reading playbook {:?}", clean))
    }
}
