// models/src/code_system.rs

use serde::{Deserialize, Serialize};

/// A code system rooted at a branch. Only the branch lookup role is used by
/// the core; authoring metadata lives elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeSystem {
    pub short_name: String,
    pub branch_path: String,
}

impl CodeSystem {
    pub fn new(short_name: &str, branch_path: &str) -> Self {
        CodeSystem {
            short_name: short_name.to_string(),
            branch_path: branch_path.to_string(),
        }
    }
}

/// A published version of a code system, keyed by effective date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeSystemVersion {
    pub short_name: String,
    pub effective_date: i32,
    pub branch_path: String,
    /// Hidden from version listings and never chosen as the latest release.
    pub internal_release: bool,
}
