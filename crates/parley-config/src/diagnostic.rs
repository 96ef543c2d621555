// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction failures and validation findings into miette
//! diagnostics, pointing at the offending key in `parley.toml` when the
//! source text is available.

#![allow(unused_assignments)] // miette's Diagnostic derive trips this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a candidate key must beat to be offered as a fix.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Name given to configuration passed in as a string.
pub const INLINE: &str = "<inline>";

/// TOML text that took part in a load, kept for span lookup.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read a file, skipping it silently when it does not exist.
    pub fn read(path: &std::path::Path) -> Option<Self> {
        std::fs::read_to_string(path)
            .ok()
            .map(|content| Self::new(path.display().to_string(), content))
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("unknown key `{key}` in [{section}]")]
    #[diagnostic(code(parley::config::unknown_key), help("{}", unknown_key_help(suggestion.as_deref(), valid_keys)))]
    UnknownKey {
        section: String,
        key: String,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("not a recognised key")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}")]
    #[diagnostic(code(parley::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        found: String,
        expected: String,
        #[label("here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("missing required key `{key}`")]
    #[diagnostic(code(parley::config::missing_key), help("set `{key}` in parley.toml or via PARLEY_* env"))]
    MissingKey { key: String },

    /// A value parsed fine but breaks a cross-field rule.
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(parley::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(parley::config::other))]
    Other(String),
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? valid keys are: {valid_keys}"),
        None => format!("valid keys are: {valid_keys}"),
    }
}

impl ConfigError {
    /// Split a figment error into one diagnostic per underlying failure.
    pub fn from_figment(err: figment::Error, sources: &[SourceFile]) -> Vec<Self> {
        err.into_iter()
            .map(|error| {
                let section: Vec<String> = error.path.iter().map(ToString::to_string).collect();
                let origin = origin_of(&error, sources);
                match &error.kind {
                    Kind::UnknownField(key, expected) => {
                        let (span, src) = locate(origin, &section, key);
                        ConfigError::UnknownKey {
                            section: section.join("."),
                            key: key.clone(),
                            suggestion: suggest_key(key, expected),
                            valid_keys: expected.join(", "),
                            span,
                            src,
                        }
                    }
                    Kind::MissingField(key) => ConfigError::MissingKey {
                        key: qualified(&section, key),
                    },
                    Kind::InvalidType(found, expected) => {
                        // For type errors the path already ends with the key.
                        let (parent, key) = match section.split_last() {
                            Some((last, parent)) => (parent.to_vec(), last.clone()),
                            None => (Vec::new(), String::new()),
                        };
                        let (span, src) = locate(origin, &parent, &key);
                        ConfigError::InvalidType {
                            key: section.join("."),
                            found: found.to_string(),
                            expected: expected.clone(),
                            span,
                            src,
                        }
                    }
                    _ => ConfigError::Other(error.to_string()),
                }
            })
            .collect()
    }
}

fn qualified(section: &[String], key: &str) -> String {
    if section.is_empty() {
        key.to_string()
    } else {
        format!("{}.{key}", section.join("."))
    }
}

/// The loaded source a figment error came from, if we kept its text.
fn origin_of<'a>(error: &figment::Error, sources: &'a [SourceFile]) -> Option<&'a SourceFile> {
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|source| match source {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });
    match file {
        Some(name) => sources.iter().find(|s| s.name == name),
        None => sources.iter().find(|s| s.name == INLINE),
    }
}

fn locate(
    origin: Option<&SourceFile>,
    section: &[String],
    key: &str,
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let Some(file) = origin else {
        return (None, None);
    };
    match key_offset(&file.content, section, key) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), key.len())),
            Some(NamedSource::new(&file.name, file.content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `key = ...` inside the `[section]` table of a TOML text.
///
/// Tracks table headers line by line, so a key of the same name in another
/// table is never matched. An empty `section` means the root table.
pub fn key_offset(content: &str, section: &[String], key: &str) -> Option<usize> {
    let wanted = section.join(".");
    let mut current = String::new();
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        if let Some(header) = trimmed.strip_prefix('[') {
            if let Some(end) = header.find(']') {
                current = header[..end].trim().to_string();
            }
        } else if current == wanted {
            if let Some(rest) = trimmed.strip_prefix(key) {
                if rest.trim_start().starts_with('=') {
                    return Some(offset + indent);
                }
            }
        }
        offset += line.len();
    }
    None
}

/// Closest valid key to `unknown`, if any is similar enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Print every diagnostic to stderr with miette's graphical renderer.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("error: {error}"),
        }
    }
}
