// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Parley messaging core.
//!
//! Values are merged from compiled defaults, `parley.toml` files and
//! `PARLEY_*` environment variables, then checked by [`validation`]. Every
//! failure comes back as a [`ConfigError`] that renders with miette.

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::{Path, PathBuf};

pub use diagnostic::{render_errors, ConfigError, SourceFile};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::ParleyConfig;

/// Load from the standard file hierarchy and validate.
pub fn load_and_validate() -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(loader::load_config(), || {
        standard_paths()
            .iter()
            .filter_map(|p| SourceFile::read(p))
            .collect()
    })
}

/// Load from an explicit file (plus env overrides) and validate.
pub fn load_and_validate_path(path: &Path) -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_path(path), || {
        SourceFile::read(path).into_iter().collect()
    })
}

/// Load from a TOML string only and validate.
pub fn load_and_validate_str(toml: &str) -> Result<ParleyConfig, Vec<ConfigError>> {
    finish(loader::load_config_from_str(toml), || {
        vec![SourceFile::new(diagnostic::INLINE, toml)]
    })
}

/// Validate a parsed config, or convert the parse failure using the source
/// texts, which are only read when needed.
fn finish(
    loaded: Result<ParleyConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<SourceFile>,
) -> Result<ParleyConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| ConfigError::from_figment(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Files consulted by [`load_config`], in the same order.
fn standard_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/parley/parley.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("parley/parley.toml"));
    }
    // figment reports the absolute path for relative files.
    let local = std::env::current_dir()
        .map(|d| d.join("parley.toml"))
        .unwrap_or_else(|_| PathBuf::from("parley.toml"));
    paths.push(local);
    paths
}
