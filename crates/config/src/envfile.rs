//! Key/value env files (`KEY=value` per line).
//!
//! The gateway reads its tuning keys from `.env` at startup and writes the
//! shared session credential back to it, so a restart can reuse the last
//! known-good token.

use regex_lite::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A `.env`-style file on disk.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries. A missing file reads as empty.
    pub fn read(&self) -> std::io::Result<HashMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };
        Ok(parse(&content))
    }

    /// Read a single key.
    pub fn get(&self, key: &str) -> std::io::Result<Option<String>> {
        Ok(self.read()?.remove(key))
    }

    /// Set `key` to `value`, replacing an existing assignment in place or
    /// appending a new line. Other lines are left untouched.
    pub fn upsert(&self, key: &str, value: &str) -> std::io::Result<()> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let updated = upsert_line(&content, key, value);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, updated)?;
        debug!(path = %self.path.display(), key, "Env file updated");
        Ok(())
    }
}

fn parse(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn upsert_line(content: &str, key: &str, value: &str) -> String {
    let assignment = format!("{key}=\"{value}\"");
    // Key names are plain identifiers; escape anyway so the pattern stays literal.
    let pattern = format!(r"(?m)^{}\s*=[^\n]*", regex_lite::escape(key));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return append_line(content, &assignment),
    };

    if re.is_match(content) {
        re.replace_all(content, regex_lite::NoExpand(&assignment))
            .into_owned()
    } else {
        append_line(content, &assignment)
    }
}

fn append_line(content: &str, line: &str) -> String {
    let delimiter = if !content.is_empty() && !content.ends_with('\n') {
        "\n"
    } else {
        ""
    };
    format!("{content}{delimiter}{line}")
}
