//! Stamp variables for tag construction.
//!
//! Stamp manifests carry one `KEY value` pair per line, where the value is
//! everything after the first space. Tags reference the variables as
//! `{KEY}` placeholders.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{LoadError, Result};

/// Name/value bindings read from one or more stamp manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StampVariables {
    vars: BTreeMap<String, String>,
}

impl StampVariables {
    /// Empty variable set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse manifest content; `path` is only used for diagnostics.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut vars = BTreeMap::new();
        for (idx, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let malformed = || LoadError::StampParseError {
                path: path.to_path_buf(),
                line: idx + 1,
                content: line.to_string(),
            };
            let (key, value) = line.split_once(' ').ok_or_else(malformed)?;
            if !is_identifier(key) {
                return Err(malformed());
            }
            vars.insert(key.to_string(), value.to_string());
        }
        Ok(Self { vars })
    }

    /// Read and parse a single manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoadError::ConfigError(format!(
                "Failed to read stamp file {}: {}",
                path.display(),
                e
            ))
        })?;
        let vars = Self::parse(path, &content)?;
        tracing::debug!(path = %path.display(), count = vars.len(), "Loaded stamp variables");
        Ok(vars)
    }

    /// Read several manifests; later files override earlier ones.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut all = Self::new();
        for path in paths {
            all.merge(Self::load(path.as_ref())?);
        }
        Ok(all)
    }

    /// Merge `other` into `self`, overriding duplicate keys.
    pub fn merge(&mut self, other: StampVariables) {
        self.vars.extend(other.vars);
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are bound.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace every `{KEY}` placeholder in `template`.
    ///
    /// Braces that do not enclose an identifier are kept verbatim. An
    /// identifier without a binding is an error.
    pub fn substitute(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_identifier(&after[..close]) => {
                    let key = &after[..close];
                    let value = self.get(key).ok_or_else(|| {
                        LoadError::ConfigError(format!(
                            "Unknown stamp variable {{{}}} in {:?}",
                            key, template
                        ))
                    })?;
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
