// concept_service/src/descriptions.rs

use std::collections::BTreeMap;

use models::component::FIELD_ACTIVE;
use models::errors::ServiceResult;
use models::{concepts, ConceptMini, Description, Entity};
use serde_json::Value;
use versioned_store::{term, terms, BoolQuery, BranchCriteria, TerminologyStore, LARGE_PAGE};

/// Joins display terms onto concept minis so reports read as text rather
/// than bare identifiers.
#[derive(Clone)]
pub struct DescriptionService {
    store: TerminologyStore,
}

impl DescriptionService {
    pub fn new(store: TerminologyStore) -> Self {
        DescriptionService { store }
    }

    /// Attach the active FSN and preferred term to each mini in the map,
    /// keyed by concept id. The first active synonym stands in as the
    /// preferred term.
    pub async fn join_active_descriptions(
        &self,
        criteria: &BranchCriteria,
        minis: &mut BTreeMap<String, ConceptMini>,
    ) -> ServiceResult<()> {
        if minis.is_empty() {
            return Ok(());
        }
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Description::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(terms(
                Description::FIELD_CONCEPT_ID,
                minis.keys().map(|id| Value::from(id.as_str())),
            ))
            .build();
        let mut stream = self.store.search_stream::<Description>(&query, LARGE_PAGE).await?;
        while let Some(description) = stream.next_hit() {
            if let Some(mini) = minis.get_mut(&description.concept_id) {
                if description.type_id == concepts::FSN {
                    if mini.fsn.is_none() {
                        mini.fsn = Some(description.term.clone());
                    }
                } else if description.type_id == concepts::SYNONYM && mini.pt.is_none() {
                    mini.pt = Some(description.term.clone());
                }
            }
        }
        Ok(())
    }
}
