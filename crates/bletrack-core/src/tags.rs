//! Device classification lookup.
//!
//! The tag table maps BLE addresses, or address prefixes, to a human-readable
//! tag name and an optional kind (`equipment`, `beacon`, ...). It is loaded once at startup from an optional TOML file:
//!
//! ```toml
//! [[tags]]
//! name = "WHEELCHAIR_A"
//! device = "AA:BB:CC:DD:EE:01"
//! kind = "equipment"
//!
//! [[tags]]
//! name = "ACME_BEACON"
//! prefix = "AC:23:3F"
//! ```
//!
//! Exact entries win over prefix entries; among prefixes the longest match wins.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigError;
use crate::record::DeviceId;

/// One `[[tags]]` entry as written in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TagEntry {
    name: String,
    device: Option<String>,
    prefix: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TagFile {
    #[serde(default)]
    tags: Vec<TagEntry>,
}

/// Classification attached to a matching device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag name, e.g. `WHEELCHAIR_A`.
    pub name: String,
    /// Free-form category, e.g. `equipment`.
    pub kind: Option<String>,
}

/// Immutable address → tag lookup.
#[derive(Debug, Clone, Default)]
pub struct TagTable {
    exact: HashMap<DeviceId, Tag>,
    /// Normalized prefixes, longest first.
    prefixes: Vec<(String, Tag)>,
}

impl TagTable {
    /// A table that tags nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the table from `path`, or return an empty table when no path is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured file cannot be read or contains invalid entries.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            tracing::info!("No tag table configured, sightings will be untagged");
            return Ok(Self::empty());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::TagTableRead {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml(&content).map_err(|message| ConfigError::TagTableInvalid {
            path: path.to_path_buf(),
            message,
        })?;

        tracing::info!(
            path = %path.display(),
            exact = table.exact.len(),
            prefixes = table.prefixes.len(),
            "Loaded tag table"
        );
        Ok(table)
    }

    /// Parse a table from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid entry.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        let file: TagFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let mut table = Self::default();

        for entry in file.tags {
            let name = entry.name.trim();
            if name.is_empty() {
                return Err("tag name cannot be empty".to_string());
            }
            let tag = Tag {
                name: name.to_string(),
                kind: entry
                    .kind
                    .as_deref()
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            };

            match (entry.device.as_deref(), entry.prefix.as_deref()) {
                (Some(device), None) => {
                    let id = DeviceId::parse(device).map_err(|e| format!("tag '{name}': {e}"))?;
                    if table.exact.insert(id.clone(), tag).is_some() {
                        return Err(format!("device {id} is tagged more than once"));
                    }
                }
                (None, Some(prefix)) => {
                    let prefix = normalize_prefix(prefix)
                        .ok_or_else(|| format!("tag '{name}': invalid prefix '{prefix}'"))?;
                    table.prefixes.push((prefix, tag));
                }
                _ => {
                    return Err(format!(
                        "tag '{name}' must set exactly one of 'device' or 'prefix'"
                    ));
                }
            }
        }

        table
            .prefixes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        Ok(table)
    }

    /// Tag for `device`, if any.
    #[must_use]
    pub fn lookup(&self, device: &DeviceId) -> Option<&Tag> {
        self.exact.get(device).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| device.as_str().starts_with(prefix.as_str()))
                .map(|(_, tag)| tag)
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize a prefix of one to five whole octets to `AA:BB:CC` form.
fn normalize_prefix(prefix: &str) -> Option<String> {
    let hex: String = prefix
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    if hex.is_empty() || hex.len() % 2 != 0 || hex.len() >= 12 {
        return None;
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let octets: Vec<&str> = (0..hex.len()).step_by(2).map(|i| &hex[i..i + 2]).collect();
    Some(octets.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[tags]]
        name = "WHEELCHAIR_A"
        device = "aa:bb:cc:dd:ee:01"
        kind = "equipment"

        [[tags]]
        name = "PATIENT_1"
        device = "AA-BB-CC-DD-EE-04"

        [[tags]]
        name = "EXAMPLE_MEDICAL"
        prefix = "AA:BB:CC"

        [[tags]]
        name = "EXAMPLE_WARD_B"
        prefix = "aabbccdd"
    "#;

    fn id(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn name_of<'a>(table: &'a TagTable, device: &str) -> Option<&'a str> {
        table.lookup(&id(device)).map(|tag| tag.name.as_str())
    }

    #[test]
    fn test_exact_match_wins() {
        let table = TagTable::from_toml(SAMPLE).unwrap();
        assert_eq!(name_of(&table, "AA:BB:CC:DD:EE:01"), Some("WHEELCHAIR_A"));
        assert_eq!(name_of(&table, "aabbccddee04"), Some("PATIENT_1"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = TagTable::from_toml(SAMPLE).unwrap();
        assert_eq!(name_of(&table, "AA:BB:CC:DD:00:00"), Some("EXAMPLE_WARD_B"));
        assert_eq!(name_of(&table, "AA:BB:CC:11:00:00"), Some("EXAMPLE_MEDICAL"));
    }

    #[test]
    fn test_kind_is_carried_with_tag() {
        let table = TagTable::from_toml(SAMPLE).unwrap();
        assert_eq!(
            table.lookup(&id("AA:BB:CC:DD:EE:01")),
            Some(&Tag {
                name: "WHEELCHAIR_A".to_string(),
                kind: Some("equipment".to_string()),
            })
        );
        assert_eq!(table.lookup(&id("AA:BB:CC:DD:EE:04")).unwrap().kind, None);
    }

    #[test]
    fn test_unknown_device_is_untagged() {
        let table = TagTable::from_toml(SAMPLE).unwrap();
        assert_eq!(table.lookup(&id("11:22:33:44:55:66")), None);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_empty_table() {
        let table = TagTable::from_toml("").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.lookup(&id("AA:BB:CC:DD:EE:01")), None);
    }

    #[test]
    fn test_entry_needs_exactly_one_matcher() {
        let both = r#"
            [[tags]]
            name = "X"
            device = "AA:BB:CC:DD:EE:01"
            prefix = "AA"
        "#;
        assert!(TagTable::from_toml(both).is_err());

        let neither = r#"
            [[tags]]
            name = "X"
        "#;
        assert!(TagTable::from_toml(neither).is_err());
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let bad_device = r#"
            [[tags]]
            name = "X"
            device = "not-a-mac"
        "#;
        assert!(TagTable::from_toml(bad_device).is_err());

        let bad_prefix = r#"
            [[tags]]
            name = "X"
            prefix = "ABC"
        "#;
        assert!(TagTable::from_toml(bad_prefix).is_err());

        let duplicate = r#"
            [[tags]]
            name = "X"
            device = "AA:BB:CC:DD:EE:01"

            [[tags]]
            name = "Y"
            device = "aabbccddee01"
        "#;
        assert!(TagTable::from_toml(duplicate).is_err());
    }

    #[test]
    fn test_load_without_path_is_empty() {
        let table = TagTable::load(None).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let table = TagTable::load(Some(&path)).unwrap();
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TagTable::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::TagTableRead { .. }));
    }
}
