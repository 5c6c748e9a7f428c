// versioned_store/src/branch.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INTERNAL_METADATA_KEY: &str = "internal";
pub const AUTHOR_FLAGS_METADATA_KEY: &str = "authorFlags";

pub const IMPORT_TYPE_METADATA_KEY: &str = "importType";
pub const IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY: &str = "importingCodeSystemVersion";
pub const INTEGRITY_ISSUE_METADATA_KEY: &str = "integrityIssue";
pub const BATCH_CHANGE_METADATA_KEY: &str = "batch-change";
pub const DEFAULT_MODULE_ID_METADATA_KEY: &str = "defaultModuleId";

/// Branch metadata: flat string values plus named string sub-maps
/// (`internal`, `authorFlags`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(MetadataValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn put_string(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), MetadataValue::String(value.to_string()));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The named sub-map, created empty when absent.
    pub fn map_or_create(&mut self, key: &str) -> &mut BTreeMap<String, String> {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| MetadataValue::Map(BTreeMap::new()));
        if !matches!(entry, MetadataValue::Map(_)) {
            *entry = MetadataValue::Map(BTreeMap::new());
        }
        match entry {
            MetadataValue::Map(map) => map,
            _ => unreachable!(),
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        match self.0.get(key) {
            Some(MetadataValue::Map(map)) => Some(map),
            _ => None,
        }
    }

    /// Value of `key` in the named sub-map, when both exist.
    pub fn get_mapped_string(&self, map_key: &str, key: &str) -> Option<&str> {
        self.get_map(map_key).and_then(|map| map.get(key)).map(String::as_str)
    }
}

/// A branch in the version-control tree. `base_timestamp` is the parent
/// view this branch was created or last rebased from; `head_timestamp`
/// advances with every successful commit. `versions_replaced` records, per
/// document type, the internal ids of ancestor rows this branch has
/// superseded or deleted, with the commit timepoint of the replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub path: String,
    pub base_timestamp: i64,
    pub head_timestamp: i64,
    pub metadata: Metadata,
    pub versions_replaced: HashMap<String, HashMap<Uuid, i64>>,
    pub last_promotion_timestamp: Option<i64>,
}

impl Branch {
    pub fn new(path: &str, base_timestamp: i64, head_timestamp: i64) -> Self {
        Branch {
            path: path.to_string(),
            base_timestamp,
            head_timestamp,
            metadata: Metadata::new(),
            versions_replaced: HashMap::new(),
            last_promotion_timestamp: None,
        }
    }

    pub fn versions_replaced_for_type(&self, doc_type: &str) -> HashSet<Uuid> {
        self.versions_replaced
            .get(doc_type)
            .map(|replaced| replaced.keys().copied().collect())
            .unwrap_or_default()
    }

    /// True while an import that spans code-system versioning is running on
    /// this branch.
    pub fn is_importing_code_system_version(&self) -> bool {
        self.metadata
            .get_mapped_string(INTERNAL_METADATA_KEY, IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY)
            == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_sub_maps_round_trip() {
        let mut metadata = Metadata::new();
        metadata
            .map_or_create(INTERNAL_METADATA_KEY)
            .insert(INTEGRITY_ISSUE_METADATA_KEY.to_string(), "true".to_string());
        metadata.put_string(DEFAULT_MODULE_ID_METADATA_KEY, "900000000000207008");

        assert_eq!(
            metadata.get_mapped_string(INTERNAL_METADATA_KEY, INTEGRITY_ISSUE_METADATA_KEY),
            Some("true")
        );
        assert_eq!(metadata.get_string(DEFAULT_MODULE_ID_METADATA_KEY), Some("900000000000207008"));

        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
