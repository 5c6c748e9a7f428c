// concept_service/src/members.rs

use std::collections::BTreeSet;

use models::errors::ServiceResult;
use models::{Entity, Identifier, ReferenceSetMember};
use serde_json::Value;
use versioned_store::{terms, BoolQuery, BranchCriteria, Commit, TerminologyStore, LARGE_PAGE};

/// Reference-set member lookup and batched persistence.
#[derive(Clone)]
pub struct ReferenceSetMemberService {
    store: TerminologyStore,
}

impl ReferenceSetMemberService {
    pub fn new(store: TerminologyStore) -> Self {
        ReferenceSetMemberService { store }
    }

    pub async fn find_members(
        &self,
        criteria: &BranchCriteria,
        member_ids: &BTreeSet<String>,
    ) -> ServiceResult<Vec<ReferenceSetMember>> {
        if member_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
            .must(terms(
                ReferenceSetMember::FIELD_MEMBER_ID,
                member_ids.iter().map(|id| Value::from(id.as_str())),
            ))
            .build();
        let mut stream = self
            .store
            .search_stream::<ReferenceSetMember>(&query, LARGE_PAGE)
            .await?;
        let mut members = Vec::new();
        while let Some(member) = stream.next_hit() {
            members.push(member);
        }
        Ok(members)
    }

    pub async fn do_save_batch_members(
        &self,
        commit: &mut Commit,
        members: Vec<ReferenceSetMember>,
    ) -> ServiceResult<()> {
        self.store.save_batch(commit, members).await
    }
}

/// Alternate-identifier persistence, kept separate from the member service
/// because identifiers are a core RF2 file of their own.
#[derive(Clone)]
pub struct IdentifierService {
    store: TerminologyStore,
}

impl IdentifierService {
    pub fn new(store: TerminologyStore) -> Self {
        IdentifierService { store }
    }

    pub async fn do_save_batch_identifiers(
        &self,
        commit: &mut Commit,
        identifiers: Vec<Identifier>,
    ) -> ServiceResult<()> {
        self.store.save_batch(commit, identifiers).await
    }
}
