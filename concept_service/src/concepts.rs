// concept_service/src/concepts.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use models::component::FIELD_ACTIVE;
use models::errors::ServiceResult;
use models::{Concept, ConceptMini, Description, Entity, Relationship};
use serde_json::Value;
use versioned_store::{term, terms, BoolQuery, BranchCriteria, Commit, TerminologyStore, LARGE_PAGE};

/// Read-side concept queries plus the batched save helpers used by the
/// import pipeline.
#[derive(Clone)]
pub struct ConceptService {
    store: TerminologyStore,
}

impl ConceptService {
    pub fn new(store: TerminologyStore) -> Self {
        ConceptService { store }
    }

    /// Ids of every concept active in the given view.
    pub async fn find_all_active_concepts(&self, criteria: &BranchCriteria) -> ServiceResult<HashSet<i64>> {
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .build();
        let ids = self
            .store
            .search_field(Concept::DOC_TYPE, &query, Concept::FIELD_CONCEPT_ID)
            .await;
        Ok(ids
            .into_iter()
            .filter_map(|value| value_as_sctid(&value))
            .collect())
    }

    /// Of the requested concepts, those currently active in the view.
    pub async fn find_active_concepts_among(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &BTreeSet<i64>,
    ) -> ServiceResult<HashSet<i64>> {
        if concept_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(terms(
                Concept::FIELD_CONCEPT_ID,
                concept_ids.iter().map(|id| Value::from(id.to_string())),
            ))
            .build();
        let ids = self
            .store
            .search_field(Concept::DOC_TYPE, &query, Concept::FIELD_CONCEPT_ID)
            .await;
        Ok(ids
            .into_iter()
            .filter_map(|value| value_as_sctid(&value))
            .collect())
    }

    /// Bare concept minis for the requested ids; display terms are joined
    /// separately by the description service.
    pub async fn find_concept_minis(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &BTreeSet<i64>,
    ) -> ServiceResult<BTreeMap<String, ConceptMini>> {
        let mut minis = BTreeMap::new();
        if concept_ids.is_empty() {
            return Ok(minis);
        }
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
            .must(terms(
                Concept::FIELD_CONCEPT_ID,
                concept_ids.iter().map(|id| Value::from(id.to_string())),
            ))
            .build();
        let mut stream = self.store.search_stream::<Concept>(&query, LARGE_PAGE).await?;
        while let Some(concept) = stream.next_hit() {
            minis.insert(concept.concept_id.clone(), ConceptMini::new(&concept.concept_id));
        }
        Ok(minis)
    }

    /// First page of concepts on a branch view; used to probe a branch for
    /// any existing content.
    pub async fn find_first_page(&self, criteria: &BranchCriteria, page_size: usize) -> ServiceResult<Vec<Concept>> {
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
            .build();
        let mut stream = self.store.search_stream::<Concept>(&query, page_size).await?;
        let mut page = Vec::new();
        while page.len() < page_size {
            match stream.next_hit() {
                Some(concept) => page.push(concept),
                None => break,
            }
        }
        Ok(page)
    }

    pub async fn has_existing_content(&self, criteria: &BranchCriteria) -> ServiceResult<bool> {
        Ok(!self.find_first_page(criteria, 1).await?.is_empty())
    }

    // --- Batched save helpers driven by the import pipeline ---

    pub async fn do_save_batch_concepts(&self, commit: &mut Commit, concepts: Vec<Concept>) -> ServiceResult<()> {
        self.store.save_batch(commit, concepts).await
    }

    pub async fn do_save_batch_descriptions(
        &self,
        commit: &mut Commit,
        descriptions: Vec<Description>,
    ) -> ServiceResult<()> {
        self.store.save_batch(commit, descriptions).await
    }

    pub async fn do_save_batch_relationships(
        &self,
        commit: &mut Commit,
        relationships: Vec<Relationship>,
    ) -> ServiceResult<()> {
        self.store.save_batch(commit, relationships).await
    }
}

pub(crate) fn value_as_sctid(value: &Value) -> Option<i64> {
    match value {
        Value::String(text) => text.parse::<i64>().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}
