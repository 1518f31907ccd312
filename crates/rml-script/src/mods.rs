use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rml_core::DataModelKind;

/// The scripts one mod contributes, split by execution universe.
///
/// Built from the mod's directory and the per-universe glob patterns in its
/// manifest. Replaced wholesale when the mod is hot-reloaded.
pub struct ModScriptContext {
    name: String,
    path: PathBuf,
    scripts: HashMap<DataModelKind, Vec<PathBuf>>,
    loaded: bool,
}

impl ModScriptContext {
    /// Discovers scripts under `path` matching the given per-universe glob
    /// patterns (relative to the mod directory).
    ///
    /// Invalid patterns are logged and skipped; a pattern that matches
    /// nothing contributes nothing.
    pub fn discover(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        patterns: &HashMap<DataModelKind, Vec<String>>,
    ) -> Self {
        let name = name.into();
        let path = path.into();
        let mut scripts: HashMap<DataModelKind, Vec<PathBuf>> = HashMap::new();

        for kind in DataModelKind::ALL {
            let Some(kind_patterns) = patterns.get(&kind) else {
                continue;
            };

            let mut matched = Vec::new();

            for pattern in kind_patterns {
                let full = path.join(pattern);
                let Some(full) = full.to_str() else {
                    tracing::warn!(mod_name = name, pattern, "non-unicode script pattern");
                    continue;
                };

                match glob::glob(full) {
                    Ok(paths) => {
                        matched.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
                    }
                    Err(err) => {
                        tracing::warn!(mod_name = name, pattern, %err, "bad script pattern");
                    }
                }
            }

            matched.sort();
            matched.dedup();

            if !matched.is_empty() {
                tracing::debug!(mod_name = name, %kind, count = matched.len(), "scripts discovered");
                scripts.insert(kind, matched);
            }
        }

        Self {
            name,
            path,
            scripts,
            loaded: false,
        }
    }

    /// The mod's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mod's root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory `@self/` requires resolve against.
    pub fn scripts_dir(&self) -> PathBuf {
        self.path.join("scripts")
    }

    /// Scripts to run in the given universe.
    pub fn scripts_for(&self, kind: DataModelKind) -> &[PathBuf] {
        self.scripts.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Whether the mod's scripts have been loaded into an engine.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Marks the mod's scripts as loaded.
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }
}
