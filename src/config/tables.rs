//! Constant lookup tables: standard-library names, import-to-package mapping,
//! GUI plugin names and the heavy module list used by trimmed builds.
//!
//! The defaults are compiled in from `tables.toml`. A user file with the same
//! layout may extend them; every section is optional in the override.
//!
//! # Example
//!
//! ```no_run
//! use packer_pro::config::tables::LookupTables;
//!
//! let tables = LookupTables::builtin().expect("embedded tables parse");
//! assert!(tables.is_stdlib("os"));
//! assert_eq!(tables.package_for("PIL"), "Pillow");
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const BUILTIN_TABLES: &str = include_str!("tables.toml");

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TablesFile {
    stdlib: Vec<String>,
    packages: BTreeMap<String, String>,
    gui_plugins: BTreeMap<String, String>,
    trim: TrimSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrimSection {
    heavy_modules: Option<Vec<String>>,
}

/// Immutable lookup structures shared by the analyzer, resolver and planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTables {
    stdlib: BTreeSet<String>,
    packages: BTreeMap<String, String>,
    gui_plugins: BTreeMap<String, String>,
    heavy_modules: Vec<String>,
}

impl LookupTables {
    /// Parse the compiled-in defaults.
    pub fn builtin() -> Result<Self, ConfigError> {
        let file: TablesFile = toml::from_str(BUILTIN_TABLES)?;
        Ok(LookupTables {
            stdlib: file.stdlib.into_iter().collect(),
            packages: file.packages,
            gui_plugins: file.gui_plugins,
            heavy_modules: file.trim.heavy_modules.unwrap_or_default(),
        })
    }

    /// Defaults extended by an optional user override file.
    pub fn load(override_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut tables = Self::builtin()?;
        if let Some(path) = override_path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConfigError::FileNotFound(path.display().to_string())
                } else {
                    ConfigError::IoError(e)
                }
            })?;
            let user: TablesFile = toml::from_str(&content)?;
            tables.merge(user);
            log::info!("[Config] Lookup tables extended from {}", path.display());
        }
        Ok(tables)
    }

    fn merge(&mut self, user: TablesFile) {
        self.stdlib.extend(user.stdlib);
        self.packages.extend(user.packages);
        self.gui_plugins.extend(user.gui_plugins);
        if let Some(heavy) = user.trim.heavy_modules {
            self.heavy_modules = heavy;
        }
    }

    /// Return a copy whose standard-library set also contains `names`.
    ///
    /// Used to fold in the interpreter's own `sys.stdlib_module_names` and
    /// `sys.builtin_module_names`.
    pub fn with_stdlib_names<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tables = self.clone();
        tables.stdlib.extend(names.into_iter().map(Into::into));
        tables
    }

    pub fn is_stdlib(&self, module: &str) -> bool {
        self.stdlib.contains(module)
    }

    /// Installable package name for an import name (identity when unmapped).
    pub fn package_for(&self, module: &str) -> String {
        self.packages
            .get(module)
            .cloned()
            .unwrap_or_else(|| module.to_string())
    }

    /// Nuitka plugin needed for a GUI toolkit import, if any.
    pub fn gui_plugin_for(&self, module: &str) -> Option<&str> {
        self.gui_plugins.get(module).map(String::as_str)
    }

    pub fn heavy_modules(&self) -> &[String] {
        &self.heavy_modules
    }

    pub fn stdlib_len(&self) -> usize {
        self.stdlib.len()
    }
}
