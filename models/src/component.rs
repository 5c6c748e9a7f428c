// models/src/component.rs

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Version-control fields stamped onto every stored document by the
/// versioned store. `start`/`end` are commit timepoints in epoch millis;
/// a row with `end == None` is the current version on its `path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// The shared RF2 component envelope: effective time, activity, module,
/// plus the release envelope carried between published versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_time: Option<i32>,
    pub active: bool,
    pub module_id: String,
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_effective_time: Option<i32>,
    pub changed: bool,
}

/// Any document stored by the versioned store.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Store collection this entity lives in.
    const DOC_TYPE: &'static str;
    /// Document field holding the component id.
    const ID_FIELD: &'static str;

    fn id(&self) -> String;
    fn version(&self) -> &VersionFields;
    fn version_mut(&mut self) -> &mut VersionFields;
}

pub const FIELD_ACTIVE: &str = "active";
pub const FIELD_EFFECTIVE_TIME: &str = "effectiveTime";
pub const FIELD_RELEASED: &str = "released";
pub const FIELD_MODULE_ID: &str = "moduleId";

/// An RF2 component: an [`Entity`] carrying the [`ComponentFields`] envelope.
pub trait SnomedComponent: Entity {
    fn component(&self) -> &ComponentFields;
    fn component_mut(&mut self) -> &mut ComponentFields;

    /// Tab-joined component-significant fields, hashed to detect whether a
    /// component still equals its last released state. Excludes the
    /// envelope itself.
    fn release_hash_source(&self) -> String;

    fn build_release_hash(&self) -> String {
        let digest = Sha256::digest(self.release_hash_source().as_bytes());
        base64::engine::general_purpose::STANDARD.encode(digest)
    }

    /// Stamp the component as released at `effective_time`.
    fn release(&mut self, effective_time: i32) {
        let hash = self.build_release_hash();
        let component = self.component_mut();
        component.released = true;
        component.release_hash = Some(hash);
        component.released_effective_time = Some(effective_time);
        component.effective_time = Some(effective_time);
    }

    /// Copy the release envelope from a previously released version.
    fn copy_release_details(&mut self, released_version: &Self) {
        let other = released_version.component().clone();
        let component = self.component_mut();
        component.released = other.released;
        component.release_hash = other.release_hash;
        component.released_effective_time = other.released_effective_time;
    }

    /// Re-derive `effectiveTime`: a component whose state still matches its
    /// last release keeps that release's effective time, anything else is
    /// unreleased content.
    fn update_effective_time(&mut self) {
        let matches_release = self.component().released
            && self.component().release_hash.as_deref() == Some(self.build_release_hash().as_str());
        let released_effective_time = self.component().released_effective_time;
        let component = self.component_mut();
        component.effective_time = if matches_release {
            released_effective_time
        } else {
            None
        };
    }

    fn mark_changed(&mut self) {
        self.component_mut().changed = true;
    }

    /// Blank the whole envelope, turning the component into unreleased
    /// editable content.
    fn clear_release_details(&mut self) {
        let component = self.component_mut();
        component.effective_time = None;
        component.released = false;
        component.release_hash = None;
        component.released_effective_time = None;
    }
}
