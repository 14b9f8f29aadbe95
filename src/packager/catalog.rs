//! Mod catalog: the curated list of distributable mods.
//!
//! The catalog is a JSON document maintained alongside the mod files:
//! `{"collection": "...", "mods": [{"mod_id": 1063, "name": "Automate",
//! "section": "Required", "version": "2.3.1", "file_name": "Automate_2.3.1.zip",
//! "url": "..."}]}`. Bundle requests reference entries by numeric id or by
//! exact (case-insensitive) name.

use crate::core::error::{AppError, AppResult};
use crate::packager::PackagingError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One catalog entry describing a distributable mod file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModEntry {
    /// Numeric mod id (Nexus-style)
    pub mod_id: u32,
    /// Display name
    pub name: String,
    /// Collection section (e.g. "Required", "Visuals")
    #[serde(default)]
    pub section: String,
    /// Mod version string
    #[serde(default)]
    pub version: Option<String>,
    /// Archive file name, relative to the mods directory
    pub file_name: String,
    /// Remote source URL for the fetch strategy
    #[serde(default)]
    pub url: Option<String>,
    /// Expected file size, when known
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// The curated mod catalog, indexed for id and name lookups.
#[derive(Debug, Clone)]
pub struct ModCatalog {
    /// Collection display name
    pub collection: String,
    /// All entries in catalog order
    pub mods: Vec<ModEntry>,
    by_id: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

/// Raw on-disk shape, before index construction.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_collection")]
    collection: String,
    mods: Vec<ModEntry>,
}

fn default_collection() -> String {
    "collection".to_string()
}

impl ModCatalog {
    /// Loads and validates a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// `AppError::Catalog` on an empty mod list or duplicate mod ids,
    /// `AppError::Io` / `AppError::Catalog` on unreadable or malformed JSON.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: CatalogFile =
            serde_json::from_str(&raw).map_err(|e| AppError::Catalog(format!("malformed catalog JSON: {}", e)))?;
        Self::from_entries(file.collection, file.mods)
    }

    /// Builds a catalog from already-parsed entries.
    pub fn from_entries(collection: String, mods: Vec<ModEntry>) -> AppResult<Self> {
        if mods.is_empty() {
            return Err(AppError::Catalog("catalog contains no mods".to_string()));
        }

        let mut by_id = HashMap::with_capacity(mods.len());
        let mut by_name = HashMap::with_capacity(mods.len());
        for (idx, entry) in mods.iter().enumerate() {
            if by_id.insert(entry.mod_id, idx).is_some() {
                return Err(AppError::Catalog(format!("duplicate mod_id {} in catalog", entry.mod_id)));
            }
            // Last entry wins on duplicate names; ids stay authoritative
            by_name.insert(entry.name.to_lowercase(), idx);
        }

        Ok(Self {
            collection,
            mods,
            by_id,
            by_name,
        })
    }

    /// Looks up an entry by numeric id or exact (case-insensitive) name.
    pub fn get(&self, key: &str) -> Option<&ModEntry> {
        if let Ok(id) = key.parse::<u32>() {
            if let Some(&idx) = self.by_id.get(&id) {
                return self.mods.get(idx);
            }
        }
        self.by_name.get(&key.to_lowercase()).and_then(|&idx| self.mods.get(idx))
    }

    /// Resolves a bundle request's keys to catalog entries, in order.
    ///
    /// # Errors
    ///
    /// `PackagingError::UnknownMod` naming the first key with no entry.
    pub fn resolve(&self, keys: &[String]) -> Result<Vec<&ModEntry>, PackagingError> {
        keys.iter()
            .map(|key| self.get(key).ok_or_else(|| PackagingError::UnknownMod(key.clone())))
            .collect()
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.mods.len()
    }

    /// True when the catalog has no entries (never the case after `load`).
    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Entry counts per section, for the validate-catalog command.
    pub fn section_counts(&self) -> HashMap<&str, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.mods {
            let section = if entry.section.is_empty() { "(none)" } else { &entry.section };
            *counts.entry(section).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn sample() -> ModCatalog {
        ModCatalog::from_entries(
            "Test Collection".to_string(),
            vec![
                ModEntry {
                    mod_id: 1063,
                    name: "Automate".to_string(),
                    section: "Required".to_string(),
                    version: Some("2.3.1".to_string()),
                    file_name: "Automate_2.3.1.zip".to_string(),
                    url: None,
                    size_bytes: Some(1024),
                },
                ModEntry {
                    mod_id: 518,
                    name: "Chests Anywhere".to_string(),
                    section: "Quality of Life".to_string(),
                    version: None,
                    file_name: "ChestsAnywhere.zip".to_string(),
                    url: Some("https://mods.example.com/518.zip".to_string()),
                    size_bytes: None,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let catalog = sample();
        assert_eq!(catalog.get("1063").unwrap().name, "Automate");
        assert_eq!(catalog.get("Automate").unwrap().mod_id, 1063);
        assert_eq!(catalog.get("chests anywhere").unwrap().mod_id, 518);
        assert!(catalog.get("9999").is_none());
        assert!(catalog.get("Not A Mod").is_none());
    }

    #[test]
    fn test_resolve_preserves_order() {
        let catalog = sample();
        let entries = catalog.resolve(&["518".to_string(), "Automate".to_string()]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mod_id, 518);
        assert_eq!(entries[1].mod_id, 1063);
    }

    #[test]
    fn test_resolve_unknown_mod() {
        let catalog = sample();
        let err = catalog
            .resolve(&["1063".to_string(), "Mystery Mod".to_string()])
            .unwrap_err();
        match err {
            PackagingError::UnknownMod(key) => assert_eq!(key, "Mystery Mod"),
            other => panic!("expected UnknownMod, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let entry = ModEntry {
            mod_id: 7,
            name: "A".to_string(),
            section: String::new(),
            version: None,
            file_name: "a.zip".to_string(),
            url: None,
            size_bytes: None,
        };
        let mut dup = entry.clone();
        dup.name = "B".to_string();
        let err = ModCatalog::from_entries("c".to_string(), vec![entry, dup]).unwrap_err();
        assert!(matches!(err, AppError::Catalog(_)));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let err = ModCatalog::from_entries("c".to_string(), vec![]).unwrap_err();
        assert!(matches!(err, AppError::Catalog(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"collection": "Very Expanded", "mods": [
                {{"mod_id": 2400, "name": "SMAPI", "file_name": "smapi.zip"}}
            ]}}"#
        )
        .unwrap();

        let catalog = ModCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.collection, "Very Expanded");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("SMAPI").unwrap().mod_id, 2400);
    }

    #[test]
    fn test_load_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = ModCatalog::load(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Catalog(_)));
    }

    #[test]
    fn test_section_counts() {
        let catalog = sample();
        let counts = catalog.section_counts();
        assert_eq!(counts.get("Required"), Some(&1));
        assert_eq!(counts.get("Quality of Life"), Some(&1));
    }
}
