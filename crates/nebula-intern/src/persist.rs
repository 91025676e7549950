//! RON files for id maps, so assigned ids survive a restart.
//!
//! The file stores the allocation counter next to the entries: ids handed out
//! and later dropped are never reassigned after a reload.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::InternError;
use crate::interner::IdInterner;

/// On-disk form of one id map.
#[derive(Debug, Serialize, Deserialize)]
struct IdMapFile {
    name: String,
    next_id: u32,
    entries: Vec<(u32, String)>,
}

fn persist_error(path: &Path, e: impl std::fmt::Display) -> InternError {
    InternError::Persist {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

impl IdInterner {
    /// Writes every mapping and the allocation counter to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), InternError> {
        let file = IdMapFile {
            name: self.name().to_owned(),
            next_id: self.next_id(),
            entries: self.items(),
        };
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let serialized =
            ron::ser::to_string_pretty(&file, pretty).map_err(|e| persist_error(path, e))?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| persist_error(dir, e))?;
        }
        let tmp = path.with_extension("ron.tmp");
        fs::write(&tmp, serialized).map_err(|e| persist_error(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| persist_error(path, e))?;
        tracing::debug!(
            "Saved {} ids of map '{}' to {}",
            file.entries.len(),
            self.name(),
            path.display()
        );
        Ok(())
    }

    /// Merges the mappings saved at `path` into this map and restores the
    /// counter. Returns how many entries were inserted.
    ///
    /// A missing file loads nothing. Entries outside `[0, max_id)` or
    /// conflicting with an existing mapping are skipped and logged.
    pub fn load_from(&self, path: &Path) -> Result<usize, InternError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(persist_error(path, e)),
        };
        let file: IdMapFile = ron::from_str(&contents).map_err(|e| persist_error(path, e))?;
        if file.name != self.name() {
            tracing::warn!(
                "Loading ids saved for map '{}' into map '{}'",
                file.name,
                self.name()
            );
        }

        let mut inserted = 0;
        for (id, key) in &file.entries {
            if self.insert_exact(key, *id) {
                inserted += 1;
            } else if self.get_id(key) != Some(*id) {
                tracing::warn!(
                    "Skipped saved entry {} -> '{}' in map '{}'",
                    id,
                    key,
                    self.name()
                );
            }
        }
        self.advance_counter(file.next_id);
        tracing::info!(
            "Loaded {} ids into map '{}' from {}",
            inserted,
            self.name(),
            path.display()
        );
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_keeps_ids_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maps").join("items.ron");

        let map = IdInterner::new("items", 4, 64).unwrap();
        map.register_with_id("air", 0).unwrap();
        let torch = map.register("torch").unwrap();
        let gem = map.register("gem").unwrap();
        map.remove_key("gem");
        map.save_to(&path).unwrap();

        let reloaded = IdInterner::new("items", 4, 64).unwrap();
        assert_eq!(reloaded.load_from(&path).unwrap(), 2);
        assert_eq!(reloaded.items(), map.items());
        assert_eq!(reloaded.get_id("torch"), Some(torch));
        // The dropped id is not handed out again.
        assert!(reloaded.register("ore").unwrap() > gem);
    }

    #[test]
    fn test_load_merges_into_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.ron");
        let saved = IdInterner::new("items", 1, 64).unwrap();
        saved.register("a").unwrap();
        saved.register("b").unwrap();
        saved.save_to(&path).unwrap();

        let map = IdInterner::new("items", 1, 64).unwrap();
        map.insert_exact("b", 2);
        map.insert_exact("c", 1);
        assert_eq!(map.load_from(&path).unwrap(), 0);
        assert_eq!(map.get_id("c"), Some(1));
        assert!(map.get_id("a").is_none());
        assert_eq!(map.register("d").unwrap(), 3);
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let map = IdInterner::new("items", 1, 64).unwrap();
        assert_eq!(map.load_from(&dir.path().join("absent.ron")).unwrap(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.ron");
        fs::write(&path, "not ron at all {").unwrap();
        let map = IdInterner::new("items", 1, 64).unwrap();
        assert!(matches!(
            map.load_from(&path),
            Err(InternError::Persist { .. })
        ));
    }

    #[test]
    fn test_saved_ids_beyond_range_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.ron");
        let wide = IdInterner::new("items", 1, 1000).unwrap();
        for i in 0..20 {
            wide.register(&format!("key{i}")).unwrap();
        }
        wide.save_to(&path).unwrap();

        let narrow = IdInterner::new("items", 1, 10).unwrap();
        assert_eq!(narrow.load_from(&path).unwrap(), 9);
        assert!(narrow.get_id("key12").is_none());
        assert!(matches!(
            narrow.register("extra"),
            Err(InternError::Exhausted { .. })
        ));
    }
}
