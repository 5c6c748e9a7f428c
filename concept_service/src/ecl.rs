// concept_service/src/ecl.rs

use models::errors::{ServiceError, ServiceResult};
use models::{Entity, QueryConcept};
use serde_json::Value;
use versioned_store::{term, BoolQuery, BranchCriteria, TerminologyStore};

use crate::concepts::value_as_sctid;

/// Minimal ECL evaluation over the semantic index. Only the
/// descendant-or-self operator (`<< X`) is needed by the core; anything
/// else is rejected.
#[derive(Clone)]
pub struct EclQueryService {
    store: TerminologyStore,
}

impl EclQueryService {
    pub fn new(store: TerminologyStore) -> Self {
        EclQueryService { store }
    }

    pub async fn select_concept_ids(
        &self,
        ecl: &str,
        criteria: &BranchCriteria,
        stated: bool,
    ) -> ServiceResult<Vec<i64>> {
        let expression = ecl.trim();
        let focus = expression
            .strip_prefix("<<")
            .map(str::trim)
            .ok_or_else(|| ServiceError::Validation(format!("Unsupported ECL expression: {}", ecl)))?;
        let focus_id: i64 = focus
            .parse()
            .map_err(|_| ServiceError::Validation(format!("Unsupported ECL focus concept: {}", focus)))?;

        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(QueryConcept::DOC_TYPE))
            .must(term(QueryConcept::FIELD_STATED, stated))
            .must(
                BoolQuery::new()
                    .should(term(QueryConcept::FIELD_CONCEPT_ID, focus_id))
                    .should(term(QueryConcept::FIELD_ANCESTORS, focus_id))
                    .build(),
            )
            .build();
        let concept_ids = self
            .store
            .search_field(QueryConcept::DOC_TYPE, &query, QueryConcept::FIELD_CONCEPT_ID)
            .await;
        let mut results: Vec<i64> = concept_ids
            .iter()
            .filter_map(|value: &Value| value_as_sctid(value))
            .collect();
        results.sort_unstable();
        results.dedup();
        Ok(results)
    }
}
