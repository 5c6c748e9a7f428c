// concept_service/src/effective_times.rs

use std::collections::HashMap;

use log::debug;
use models::component::{FIELD_EFFECTIVE_TIME, FIELD_MODULE_ID};
use models::errors::ServiceResult;
use models::{Concept, Description, Entity, Identifier, ReferenceSetMember, Relationship};
use versioned_store::{exists, BoolQuery, TerminologyStore, VersionControlHelper};

/// Computes the most recent effectiveTime already present per module, used
/// by snapshot imports to skip rows the branch already carries.
#[derive(Clone)]
pub struct MostRecentEffectiveTimeFinder {
    store: TerminologyStore,
    version_control: VersionControlHelper,
}

impl MostRecentEffectiveTimeFinder {
    pub fn new(store: TerminologyStore, version_control: VersionControlHelper) -> Self {
        MostRecentEffectiveTimeFinder {
            store,
            version_control,
        }
    }

    /// `{moduleId → max effectiveTime}` over every component type visible
    /// on the branch.
    pub async fn get_effective_time_by_module_id(&self, branch_path: &str) -> ServiceResult<HashMap<String, i32>> {
        let criteria = self.version_control.branch_criteria_at_path(branch_path).await?;
        let mut by_module: HashMap<String, i32> = HashMap::new();
        for doc_type in [
            Concept::DOC_TYPE,
            Description::DOC_TYPE,
            Relationship::DOC_TYPE,
            Identifier::DOC_TYPE,
            ReferenceSetMember::DOC_TYPE,
        ] {
            let query = BoolQuery::new()
                .must(criteria.entity_branch_criteria(doc_type))
                .must(exists(FIELD_EFFECTIVE_TIME))
                .build();
            for source in self.store.search_sources(doc_type, &query).await {
                let module_id = source.get(FIELD_MODULE_ID).and_then(|v| v.as_str());
                let effective_time = source.get(FIELD_EFFECTIVE_TIME).and_then(|v| v.as_i64());
                if let (Some(module_id), Some(effective_time)) = (module_id, effective_time) {
                    let entry = by_module.entry(module_id.to_string()).or_insert(0);
                    if effective_time as i32 > *entry {
                        *entry = effective_time as i32;
                    }
                }
            }
        }
        debug!("Latest effectiveTime by module on {}: {:?}", branch_path, by_module);
        Ok(by_module)
    }
}
