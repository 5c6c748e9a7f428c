// integrity_service/src/service.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use log::{error, info};
use serde_json::Value;

use concept_service::{AxiomConversionService, CodeSystemService, ConceptService, DescriptionService};
use models::component::FIELD_ACTIVE;
use models::errors::{parse_sctid, ServiceError, ServiceResult};
use models::{concepts, ConceptMini, ConceptsInForm, Entity, IntegrityIssueReport, QueryConcept, ReferenceSetMember, Relationship};
use versioned_store::branch::{INTEGRITY_ISSUE_METADATA_KEY, INTERNAL_METADATA_KEY};
use versioned_store::{
    path_util, term, terms, BoolQuery, Branch, BranchCriteria, BranchService, Commit, CommitListener, Query,
    TerminologyStore, Timer, VersionControlHelper, LARGE_PAGE,
};

pub const FAILED_TO_DESERIALISE_AXIOM_DURING_REFERENCE_INTEGRITY_CHECK: &str =
    "Failed to deserialise axiom during reference integrity check.";

/// Detects and reports dangling references: active non-inferred
/// relationships and OWL axiom members pointing at concepts which are
/// missing or inactive on the branch.
#[derive(Clone)]
pub struct IntegrityService {
    store: TerminologyStore,
    branch_service: BranchService,
    version_control: VersionControlHelper,
    concept_service: ConceptService,
    description_service: DescriptionService,
    code_system_service: CodeSystemService,
    axiom_conversion_service: AxiomConversionService,
}

impl IntegrityService {
    pub fn new(
        store: TerminologyStore,
        branch_service: BranchService,
        code_system_service: CodeSystemService,
    ) -> Self {
        IntegrityService {
            version_control: VersionControlHelper::new(store.clone()),
            concept_service: ConceptService::new(store.clone()),
            description_service: DescriptionService::new(store.clone()),
            axiom_conversion_service: AxiomConversionService::new(),
            store,
            branch_service,
            code_system_service,
        }
    }

    /// Incremental check over the components changed on a branch.
    pub async fn find_changed_components_with_bad_integrity_not_fixed(
        &self,
        branch: &Branch,
    ) -> ServiceResult<IntegrityIssueReport> {
        let criteria = self.version_control.branch_criteria(branch).await?;
        self.find_changed_components_with_bad_integrity_not_fixed_within(&criteria, branch)
            .await
    }

    /// Incremental check in an explicit view (used by the commit hook to
    /// include the open commit).
    pub async fn find_changed_components_with_bad_integrity_not_fixed_within(
        &self,
        criteria: &BranchCriteria,
        branch: &Branch,
    ) -> ServiceResult<IntegrityIssueReport> {
        if branch.path == path_util::MAIN {
            return Err(ServiceError::RuntimeState(
                "This function can not be used on the MAIN branch. Please use the full integrity check instead."
                    .to_string(),
            ));
        }

        let mut timer = Timer::new(&format!("Changed component integrity check on {}", branch.path));

        let mut relationship_with_inactive_source: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_with_inactive_type: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_with_inactive_destination: BTreeMap<i64, i64> = BTreeMap::new();
        let mut axiom_with_inactive_referenced_concept: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();

        // Find the concepts which have been deleted or inactivated on this
        // branch, then the active components still using them.
        let deleted_or_inactive_concepts = self.find_deleted_or_inactivated_concepts(branch, criteria).await?;
        timer.checkpoint(&format!(
            "Collect deleted or inactive concepts: {}",
            deleted_or_inactive_concepts.len()
        ));

        let bad_reference_query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Relationship::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must_not(term(
                Relationship::FIELD_CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
            .must(
                BoolQuery::new()
                    .should(terms_of(Relationship::FIELD_SOURCE_ID, &deleted_or_inactive_concepts))
                    .should(terms_of(Relationship::FIELD_TYPE_ID, &deleted_or_inactive_concepts))
                    .should(terms_of(
                        Relationship::FIELD_DESTINATION_ID,
                        &deleted_or_inactive_concepts,
                    ))
                    .build(),
            )
            .build();
        let mut bad_relationships = self
            .store
            .search_stream::<Relationship>(&bad_reference_query, LARGE_PAGE)
            .await?;
        while let Some(relationship) = bad_relationships.next_hit() {
            let relationship_id = parse_sctid(&relationship.relationship_id)?;
            let source_id = parse_sctid(&relationship.source_id)?;
            if deleted_or_inactive_concepts.contains(&source_id) {
                relationship_with_inactive_source.insert(relationship_id, source_id);
            }
            let type_id = parse_sctid(&relationship.type_id)?;
            if deleted_or_inactive_concepts.contains(&type_id) {
                relationship_with_inactive_type.insert(relationship_id, type_id);
            }
            if let Some(destination_id) = relationship.destination_id.as_deref() {
                let destination_id = parse_sctid(destination_id)?;
                if deleted_or_inactive_concepts.contains(&destination_id) {
                    relationship_with_inactive_destination.insert(relationship_id, destination_id);
                }
            }
        }
        timer.checkpoint(&format!(
            "Collect changed relationships referencing deleted or inactive concepts: {}",
            relationship_with_inactive_source.len()
                + relationship_with_inactive_type.len()
                + relationship_with_inactive_destination.len()
        ));

        // Axioms with bad integrity, located through the stated semantic
        // index.
        let mut concept_ids_with_bad_axioms: BTreeSet<i64> = BTreeSet::new();
        let bad_stated_index_query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(QueryConcept::DOC_TYPE))
            .must(term(QueryConcept::FIELD_STATED, true))
            .must(terms_of(QueryConcept::FIELD_ATTR_WILDCARD, &deleted_or_inactive_concepts))
            .build();
        for concept_id in self
            .store
            .search_field(QueryConcept::DOC_TYPE, &bad_stated_index_query, QueryConcept::FIELD_CONCEPT_ID)
            .await
        {
            if let Some(concept_id) = concept_id.as_i64() {
                concept_ids_with_bad_axioms.insert(concept_id);
            }
        }

        let mut axiom_id_referenced_component: BTreeMap<String, String> = BTreeMap::new();
        if !concept_ids_with_bad_axioms.is_empty() {
            let possibly_bad_axiom_query = BoolQuery::new()
                .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
                .must(term(FIELD_ACTIVE, true))
                .must(term(ReferenceSetMember::FIELD_REFSET_ID, concepts::OWL_AXIOM_REFERENCE_SET))
                .must(terms_of(
                    ReferenceSetMember::FIELD_REFERENCED_COMPONENT_ID,
                    &concept_ids_with_bad_axioms,
                ))
                .build();
            let mut possibly_bad_axioms = self
                .store
                .search_stream::<ReferenceSetMember>(&possibly_bad_axiom_query, LARGE_PAGE)
                .await?;
            while let Some(axiom_member) = possibly_bad_axioms.next_hit() {
                let referenced_concepts = self.referenced_concepts_of(&axiom_member)?;
                let bad_references: BTreeSet<i64> = referenced_concepts
                    .intersection(&deleted_or_inactive_concepts)
                    .copied()
                    .collect();
                if !bad_references.is_empty() {
                    axiom_id_referenced_component
                        .insert(axiom_member.member_id.clone(), axiom_member.referenced_component_id.clone());
                    axiom_with_inactive_referenced_concept
                        .entry(axiom_member.member_id.clone())
                        .or_default()
                        .extend(bad_references);
                }
            }
        }

        // Gather every concept id used by the active axioms and stated
        // relationships changed on this task.
        let unpromoted = self.version_control.branch_criteria_unpromoted_changes(branch);
        let mut concept_used_as_source: HashMap<i64, HashSet<i64>> = HashMap::new();
        let mut concept_used_as_type: HashMap<i64, HashSet<i64>> = HashMap::new();
        let mut concept_used_as_destination: HashMap<i64, HashSet<i64>> = HashMap::new();
        let mut concept_used_in_axioms: HashMap<i64, HashSet<String>> = HashMap::new();

        let changed_relationship_query = BoolQuery::new()
            .must(unpromoted.entity_branch_criteria(Relationship::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must_not(term(
                Relationship::FIELD_CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
            .build();
        let mut changed_relationships = self
            .store
            .search_stream::<Relationship>(&changed_relationship_query, LARGE_PAGE)
            .await?;
        while let Some(relationship) = changed_relationships.next_hit() {
            let relationship_id = parse_sctid(&relationship.relationship_id)?;
            concept_used_as_source
                .entry(parse_sctid(&relationship.source_id)?)
                .or_default()
                .insert(relationship_id);
            concept_used_as_type
                .entry(parse_sctid(&relationship.type_id)?)
                .or_default()
                .insert(relationship_id);
            if let Some(destination_id) = relationship.destination_id.as_deref() {
                concept_used_as_destination
                    .entry(parse_sctid(destination_id)?)
                    .or_default()
                    .insert(relationship_id);
            }
        }

        let changed_axiom_query = BoolQuery::new()
            .must(unpromoted.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(term(ReferenceSetMember::FIELD_REFSET_ID, concepts::OWL_AXIOM_REFERENCE_SET))
            .build();
        let mut changed_axioms = self
            .store
            .search_stream::<ReferenceSetMember>(&changed_axiom_query, LARGE_PAGE)
            .await?;
        while let Some(axiom) = changed_axioms.next_hit() {
            axiom_id_referenced_component.insert(axiom.member_id.clone(), axiom.referenced_component_id.clone());
            for referenced_concept in self.referenced_concepts_of(&axiom)? {
                concept_used_in_axioms
                    .entry(referenced_concept)
                    .or_default()
                    .insert(axiom.member_id.clone());
            }
        }

        // Of these concepts, which are active?
        let mut concepts_required_active: BTreeSet<i64> = BTreeSet::new();
        concepts_required_active.extend(concept_used_as_source.keys());
        concepts_required_active.extend(concept_used_as_type.keys());
        concepts_required_active.extend(concept_used_as_destination.keys());
        concepts_required_active.extend(concept_used_in_axioms.keys());
        timer.checkpoint(&format!(
            "Collect concepts referenced in changed relationships and axioms: {}",
            concepts_required_active.len()
        ));

        let active_concepts = self
            .concept_service
            .find_active_concepts_among(criteria, &concepts_required_active)
            .await?;
        timer.checkpoint(&format!(
            "Collect active concepts referenced in changed relationships and axioms: {}",
            active_concepts.len()
        ));

        // Components using the remaining concepts have bad integrity.
        for concept_not_active in concepts_required_active
            .iter()
            .filter(|concept_id| !active_concepts.contains(*concept_id))
        {
            for relationship_id in concept_used_as_source.get(concept_not_active).into_iter().flatten() {
                relationship_with_inactive_source.insert(*relationship_id, *concept_not_active);
            }
            for relationship_id in concept_used_as_type.get(concept_not_active).into_iter().flatten() {
                relationship_with_inactive_type.insert(*relationship_id, *concept_not_active);
            }
            for relationship_id in concept_used_as_destination.get(concept_not_active).into_iter().flatten() {
                relationship_with_inactive_destination.insert(*relationship_id, *concept_not_active);
            }
            for axiom_id in concept_used_in_axioms.get(concept_not_active).into_iter().flatten() {
                axiom_with_inactive_referenced_concept
                    .entry(axiom_id.clone())
                    .or_default()
                    .insert(*concept_not_active);
            }
        }

        let axiom_minis = self
            .build_axiom_minis(criteria, &axiom_with_inactive_referenced_concept, &axiom_id_referenced_component)
            .await?;

        timer.finish();
        Ok(IntegrityIssueReport::of(
            axiom_minis,
            relationship_with_inactive_source,
            relationship_with_inactive_type,
            relationship_with_inactive_destination,
        ))
    }

    /// Fix verification: which of the parent code-system branch's issues
    /// remain unresolved on the fix branch?
    pub async fn find_changed_components_with_bad_integrity_not_fixed_on_fix_branch(
        &self,
        fix_branch: &Branch,
        extension_main_branch_path: &str,
    ) -> ServiceResult<IntegrityIssueReport> {
        let extension_main = self.branch_service.find_branch_or_throw(extension_main_branch_path).await?;
        let project_path = path_util::parent_path(&fix_branch.path)
            .ok_or_else(|| ServiceError::RuntimeState(format!("Branch {} has no parent", fix_branch.path)))?;
        let project_branch = self.branch_service.find_branch_or_throw(project_path).await?;
        if !path_util::is_descendant_of(&project_branch.path, &extension_main.path) {
            return Err(ServiceError::RuntimeState(format!(
                "Branch {} is not a descendant of {}",
                project_branch.path, extension_main_branch_path
            )));
        }
        // Both the project and the fix task must be rebased.
        if !project_branch.path.eq_ignore_ascii_case(&extension_main.path)
            && project_branch.base_timestamp < extension_main.head_timestamp
        {
            return Err(ServiceError::RuntimeState(format!(
                "Branch {} needs to rebase first before running integrity check",
                project_branch.path
            )));
        }
        if fix_branch.base_timestamp < extension_main.head_timestamp {
            return Err(ServiceError::RuntimeState(format!(
                "Branch {} needs to rebase first before running integrity check",
                fix_branch.path
            )));
        }

        let mut timer = Timer::new(&format!(
            "Changed component integrity check on {} and {}",
            fix_branch.path, extension_main_branch_path
        ));
        let parent_report = self
            .find_changed_components_with_bad_integrity_not_fixed(&extension_main)
            .await?;
        if parent_report.is_empty() {
            info!("No integrity issue found on {}", extension_main_branch_path);
            return self.find_changed_components_with_bad_integrity_not_fixed(fix_branch).await;
        }

        let mut relationship_ids_with_bad_integrity: BTreeSet<i64> = BTreeSet::new();
        if let Some(source) = &parent_report.relationships_with_missing_or_inactive_source {
            info!(
                "{} relationships with inactive source found on {}",
                source.len(),
                extension_main_branch_path
            );
            relationship_ids_with_bad_integrity.extend(source.keys());
        }
        if let Some(type_map) = &parent_report.relationships_with_missing_or_inactive_type {
            info!(
                "{} relationships with inactive type found on {}",
                type_map.len(),
                extension_main_branch_path
            );
            relationship_ids_with_bad_integrity.extend(type_map.keys());
        }
        if let Some(destination) = &parent_report.relationships_with_missing_or_inactive_destination {
            info!(
                "{} relationships with inactive destination found on {}",
                destination.len(),
                extension_main_branch_path
            );
            relationship_ids_with_bad_integrity.extend(destination.keys());
        }
        let axioms_with_bad_integrity: BTreeSet<String> = parent_report
            .axioms_with_missing_or_inactive_referenced_concept
            .as_ref()
            .map(|axioms| axioms.keys().cloned().collect())
            .unwrap_or_default();
        info!(
            "{} axioms referenced inactive concept found on {}",
            axioms_with_bad_integrity.len(),
            extension_main_branch_path
        );
        timer.checkpoint(&format!("Integrity check completed on {}", extension_main_branch_path));

        // Fetch the current source, type and destination on the fix task
        // for every relationship reported.
        let task_criteria = self.version_control.branch_criteria(fix_branch).await?;
        let mut relationship_id_to_source: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_id_to_type: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_id_to_destination: BTreeMap<i64, i64> = BTreeMap::new();
        let reported_relationship_query = BoolQuery::new()
            .must(task_criteria.entity_branch_criteria(Relationship::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must_not(term(
                Relationship::FIELD_CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
            .must(terms_of(Relationship::FIELD_RELATIONSHIP_ID, &relationship_ids_with_bad_integrity))
            .build();
        let mut reported_relationships = self
            .store
            .search_stream::<Relationship>(&reported_relationship_query, LARGE_PAGE)
            .await?;
        while let Some(relationship) = reported_relationships.next_hit() {
            let relationship_id = parse_sctid(&relationship.relationship_id)?;
            relationship_id_to_source.insert(relationship_id, parse_sctid(&relationship.source_id)?);
            relationship_id_to_type.insert(relationship_id, parse_sctid(&relationship.type_id)?);
            if let Some(destination_id) = relationship.destination_id.as_deref() {
                relationship_id_to_destination.insert(relationship_id, parse_sctid(destination_id)?);
            }
        }

        // Re-parse the concepts referenced by the axioms reported.
        let mut concept_used_in_axioms: HashMap<i64, HashSet<String>> = HashMap::new();
        let mut axiom_id_referenced_component: BTreeMap<String, String> = BTreeMap::new();
        let reported_axiom_query = BoolQuery::new()
            .must(task_criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(term(ReferenceSetMember::FIELD_REFSET_ID, concepts::OWL_AXIOM_REFERENCE_SET))
            .must(terms(
                ReferenceSetMember::FIELD_MEMBER_ID,
                axioms_with_bad_integrity.iter().map(|id| Value::from(id.as_str())),
            ))
            .build();
        let mut reported_axioms = self
            .store
            .search_stream::<ReferenceSetMember>(&reported_axiom_query, LARGE_PAGE)
            .await?;
        while let Some(axiom) = reported_axioms.next_hit() {
            axiom_id_referenced_component.insert(axiom.member_id.clone(), axiom.referenced_component_id.clone());
            for referenced_concept in self.referenced_concepts_of(&axiom)? {
                concept_used_in_axioms
                    .entry(referenced_concept)
                    .or_default()
                    .insert(axiom.member_id.clone());
            }
        }

        let mut concept_ids_to_check: BTreeSet<i64> = BTreeSet::new();
        concept_ids_to_check.extend(concept_used_in_axioms.keys());
        concept_ids_to_check.extend(relationship_id_to_source.values());
        concept_ids_to_check.extend(relationship_id_to_destination.values());
        concept_ids_to_check.extend(relationship_id_to_type.values());

        let active_concepts = self
            .concept_service
            .find_active_concepts_among(&task_criteria, &concept_ids_to_check)
            .await?;
        timer.checkpoint(&format!(
            "Collect active concepts referenced in changed relationships and axioms: {} on {}",
            active_concepts.len(),
            fix_branch.path
        ));

        // Axioms still with bad integrity.
        let mut axiom_still_with_inactive: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
        for (concept, axiom_ids) in &concept_used_in_axioms {
            if !active_concepts.contains(concept) {
                for axiom_id in axiom_ids {
                    axiom_still_with_inactive.entry(axiom_id.clone()).or_default().insert(*concept);
                }
            }
        }
        info!(
            "{} axioms still with referenced inactive concepts",
            axiom_still_with_inactive.len()
        );

        // Relationships still with bad integrity.
        let mut relationship_still_with_inactive_source: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_still_with_inactive_type: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_still_with_inactive_destination: BTreeMap<i64, i64> = BTreeMap::new();
        for (relationship_id, source_id) in &relationship_id_to_source {
            if !active_concepts.contains(source_id) {
                relationship_still_with_inactive_source.insert(*relationship_id, *source_id);
            }
        }
        for (relationship_id, destination_id) in &relationship_id_to_destination {
            if !active_concepts.contains(destination_id) {
                relationship_still_with_inactive_destination.insert(*relationship_id, *destination_id);
            }
        }
        for (relationship_id, type_id) in &relationship_id_to_type {
            if !active_concepts.contains(type_id) {
                relationship_still_with_inactive_type.insert(*relationship_id, *type_id);
            }
        }

        let axiom_minis = self
            .build_axiom_minis(&task_criteria, &axiom_still_with_inactive, &axiom_id_referenced_component)
            .await?;

        timer.finish();
        let fixed_report = IntegrityIssueReport::of(
            axiom_minis,
            relationship_still_with_inactive_source,
            relationship_still_with_inactive_type,
            relationship_still_with_inactive_destination,
        );
        if fixed_report.is_empty() {
            // Remove the integrity issue flag when the report is clean.
            let mut metadata = fix_branch.metadata.clone();
            metadata.map_or_create(INTERNAL_METADATA_KEY).remove(INTEGRITY_ISSUE_METADATA_KEY);
            self.branch_service.update_metadata(&fix_branch.path, metadata).await?;
            info!("Integrity issues have been fixed on branch {}", fix_branch.path);
        }
        Ok(fixed_report)
    }

    /// Full sweep: every active relationship (of the requested form) and,
    /// for the stated form, every axiom, checked against the full set of
    /// active concepts.
    pub async fn find_all_components_with_bad_integrity(
        &self,
        branch: &Branch,
        stated: bool,
    ) -> ServiceResult<IntegrityIssueReport> {
        let criteria = self.version_control.branch_criteria(branch).await?;
        let mut timer = Timer::new(&format!("Full integrity check on {}", branch.path));

        let mut relationship_with_inactive_source: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_with_inactive_type: BTreeMap<i64, i64> = BTreeMap::new();
        let mut relationship_with_inactive_destination: BTreeMap<i64, i64> = BTreeMap::new();
        let mut axiom_minis: BTreeMap<String, ConceptMini> = BTreeMap::new();

        let active_concepts: HashSet<i64> = self.concept_service.find_all_active_concepts(&criteria).await?;
        timer.checkpoint(&format!("Fetch active concepts: {}", active_concepts.len()));

        let active_values: Vec<Value> = active_concepts.iter().map(|id| Value::from(id.to_string())).collect();
        let mut relationship_query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(Relationship::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(
                BoolQuery::new()
                    .should(
                        BoolQuery::new()
                            .must_not(Query::Terms {
                                field: Relationship::FIELD_SOURCE_ID.to_string(),
                                values: active_values.clone(),
                            })
                            .build(),
                    )
                    .should(
                        BoolQuery::new()
                            .must_not(Query::Terms {
                                field: Relationship::FIELD_TYPE_ID.to_string(),
                                values: active_values.clone(),
                            })
                            .build(),
                    )
                    .should(
                        BoolQuery::new()
                            .must(versioned_store::exists(Relationship::FIELD_DESTINATION_ID))
                            .must_not(Query::Terms {
                                field: Relationship::FIELD_DESTINATION_ID.to_string(),
                                values: active_values.clone(),
                            })
                            .build(),
                    )
                    .build(),
            );
        relationship_query = if stated {
            relationship_query.must_not(term(
                Relationship::FIELD_CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
        } else {
            relationship_query.must(term(
                Relationship::FIELD_CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
        };
        let mut relationships = self
            .store
            .search_stream::<Relationship>(&relationship_query.build(), LARGE_PAGE)
            .await?;
        while let Some(relationship) = relationships.next_hit() {
            let relationship_id = parse_sctid(&relationship.relationship_id)?;
            put_if_inactive(
                &relationship.source_id,
                &active_concepts,
                relationship_id,
                &mut relationship_with_inactive_source,
            )?;
            put_if_inactive(
                &relationship.type_id,
                &active_concepts,
                relationship_id,
                &mut relationship_with_inactive_type,
            )?;
            if let Some(destination_id) = relationship.destination_id.as_deref() {
                put_if_inactive(
                    destination_id,
                    &active_concepts,
                    relationship_id,
                    &mut relationship_with_inactive_destination,
                )?;
            }
        }

        if stated {
            // Axioms pointing outside the active concepts; the stated
            // semantic index narrows the candidates first.
            let mut concept_ids_with_bad_axioms: BTreeSet<i64> = BTreeSet::new();
            let bad_stated_index_query = BoolQuery::new()
                .must(criteria.entity_branch_criteria(QueryConcept::DOC_TYPE))
                .must(term(QueryConcept::FIELD_STATED, true))
                .must_not(Query::Terms {
                    field: QueryConcept::FIELD_ATTR_WILDCARD.to_string(),
                    values: active_values.clone(),
                })
                .build();
            for concept_id in self
                .store
                .search_field(QueryConcept::DOC_TYPE, &bad_stated_index_query, QueryConcept::FIELD_CONCEPT_ID)
                .await
            {
                if let Some(concept_id) = concept_id.as_i64() {
                    concept_ids_with_bad_axioms.insert(concept_id);
                }
            }

            if !concept_ids_with_bad_axioms.is_empty() {
                let possibly_bad_axiom_query = BoolQuery::new()
                    .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
                    .must(term(FIELD_ACTIVE, true))
                    .must(term(ReferenceSetMember::FIELD_REFSET_ID, concepts::OWL_AXIOM_REFERENCE_SET))
                    .must(terms_of(
                        ReferenceSetMember::FIELD_REFERENCED_COMPONENT_ID,
                        &concept_ids_with_bad_axioms,
                    ))
                    .build();
                let mut possibly_bad_axioms = self
                    .store
                    .search_stream::<ReferenceSetMember>(&possibly_bad_axiom_query, LARGE_PAGE)
                    .await?;
                let mut axiom_bad_refs: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
                let mut axiom_id_referenced_component: BTreeMap<String, String> = BTreeMap::new();
                while let Some(axiom_member) = possibly_bad_axioms.next_hit() {
                    let referenced_concepts = self.referenced_concepts_of(&axiom_member)?;
                    let bad_references: BTreeSet<i64> = referenced_concepts
                        .iter()
                        .filter(|concept_id| !active_concepts.contains(concept_id))
                        .copied()
                        .collect();
                    if !bad_references.is_empty() {
                        axiom_id_referenced_component
                            .insert(axiom_member.member_id.clone(), axiom_member.referenced_component_id.clone());
                        axiom_bad_refs
                            .entry(axiom_member.member_id.clone())
                            .or_default()
                            .extend(bad_references);
                    }
                }
                axiom_minis = self
                    .build_axiom_minis(&criteria, &axiom_bad_refs, &axiom_id_referenced_component)
                    .await?;
            }
        }

        timer.finish();
        Ok(IntegrityIssueReport::of(
            axiom_minis,
            relationship_with_inactive_source,
            relationship_with_inactive_type,
            relationship_with_inactive_destination,
        ))
    }

    /// Operator cross-check: semantic-index rows whose concept no longer
    /// exists as an active concept, partitioned by form.
    pub async fn find_extra_concepts_in_semantic_index(&self, branch_path: &str) -> ServiceResult<ConceptsInForm> {
        let mut timer = Timer::new("Semantic delete check");
        let criteria = self.version_control.branch_criteria_at_path(branch_path).await?;
        let active_concepts = self.concept_service.find_all_active_concepts(&criteria).await?;
        timer.checkpoint(&format!("Fetch active concepts: {}", active_concepts.len()));

        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(QueryConcept::DOC_TYPE))
            .must_not(Query::Terms {
                field: QueryConcept::FIELD_CONCEPT_ID.to_string(),
                values: active_concepts.iter().map(|id| Value::from(*id)).collect(),
            })
            .build();
        let mut stated_ids = Vec::new();
        let mut inferred_ids = Vec::new();
        let mut stream = self.store.search_stream::<QueryConcept>(&query, LARGE_PAGE).await?;
        while let Some(semantic_concept) = stream.next_hit() {
            if semantic_concept.stated {
                stated_ids.push(semantic_concept.concept_id);
            } else {
                inferred_ids.push(semantic_concept.concept_id);
            }
        }
        timer.checkpoint("Check whole semantic index for branch.");
        timer.finish();

        if !stated_ids.is_empty() || !inferred_ids.is_empty() {
            error!(
                "Found {} stated and {} inferred concepts in semantic index for branch {} which should not be there.",
                stated_ids.len(),
                inferred_ids.len(),
                branch_path
            );
        } else {
            info!(
                "Found {} stated and {} inferred concepts in semantic index for branch {} which should not be there.",
                stated_ids.len(),
                inferred_ids.len(),
                branch_path
            );
        }
        Ok(ConceptsInForm {
            stated_concept_ids: stated_ids,
            inferred_concept_ids: inferred_ids,
        })
    }

    async fn find_deleted_or_inactivated_concepts(
        &self,
        branch: &Branch,
        criteria: &BranchCriteria,
    ) -> ServiceResult<BTreeSet<i64>> {
        // Concepts changed or deleted on this branch.
        let changes_and_deletions = self
            .version_control
            .branch_criteria_unpromoted_changes_and_deletions(branch);
        let changed_or_deleted: BTreeSet<i64> = self
            .store
            .search_field(
                models::Concept::DOC_TYPE,
                &BoolQuery::new()
                    .must(changes_and_deletions.entity_branch_criteria(models::Concept::DOC_TYPE))
                    .build(),
                models::Concept::FIELD_CONCEPT_ID,
            )
            .await
            .iter()
            .filter_map(|value| value.as_str().and_then(|id| id.parse::<i64>().ok()))
            .collect();
        info!(
            "Concepts changed or deleted on branch {} = {}",
            branch.path,
            changed_or_deleted.len()
        );

        // Of these, which are currently present and active?
        let changed_and_active = self
            .concept_service
            .find_active_concepts_among(criteria, &changed_or_deleted)
            .await?;
        info!(
            "Concepts changed, currently present and active on branch {} = {}",
            branch.path,
            changed_and_active.len()
        );

        let deleted_or_inactive: BTreeSet<i64> = changed_or_deleted
            .into_iter()
            .filter(|concept_id| !changed_and_active.contains(concept_id))
            .collect();
        info!(
            "Concepts deleted or inactive on branch {} = {}",
            branch.path,
            deleted_or_inactive.len()
        );
        Ok(deleted_or_inactive)
    }

    fn referenced_concepts_of(&self, axiom_member: &ReferenceSetMember) -> ServiceResult<BTreeSet<i64>> {
        let owl_expression = axiom_member
            .additional_field(ReferenceSetMember::OWL_EXPRESSION)
            .unwrap_or_default();
        self.axiom_conversion_service
            .get_referenced_concepts(owl_expression)
            .map_err(|_| {
                ServiceError::Conversion(FAILED_TO_DESERIALISE_AXIOM_DURING_REFERENCE_INTEGRITY_CHECK.to_string())
            })
    }

    /// Attach display terms to the axiom report entries. Axioms defining
    /// the same concept share one enriched descriptor.
    async fn build_axiom_minis(
        &self,
        criteria: &BranchCriteria,
        axiom_bad_refs: &BTreeMap<String, BTreeSet<i64>>,
        axiom_id_referenced_component: &BTreeMap<String, String>,
    ) -> ServiceResult<BTreeMap<String, ConceptMini>> {
        let mut minis_by_concept: BTreeMap<String, ConceptMini> = BTreeMap::new();
        for (axiom_id, bad_references) in axiom_bad_refs {
            if let Some(referenced_component_id) = axiom_id_referenced_component.get(axiom_id) {
                minis_by_concept
                    .entry(referenced_component_id.clone())
                    .or_insert_with(|| ConceptMini::new(referenced_component_id))
                    .add_missing_or_inactive_concepts(bad_references);
            }
        }
        self.description_service
            .join_active_descriptions(criteria, &mut minis_by_concept)
            .await?;

        let mut axiom_minis = BTreeMap::new();
        for axiom_id in axiom_bad_refs.keys() {
            if let Some(referenced_component_id) = axiom_id_referenced_component.get(axiom_id) {
                if let Some(mini) = minis_by_concept.get(referenced_component_id) {
                    axiom_minis.insert(axiom_id.clone(), mini.clone());
                }
            }
        }
        Ok(axiom_minis)
    }

    async fn run_commit_integrity_check(&self, commit: &mut Commit) -> ServiceResult<()> {
        let branch_path = commit.branch().path.clone();
        let code_system = self
            .code_system_service
            .find_closest_code_system_using_any_branch(&branch_path)
            .await
            .ok_or_else(|| ServiceError::RuntimeState(format!("No CodeSystem found for branch {}", branch_path)))?;
        let report = if code_system.branch_path == branch_path {
            // Run the integrity check for content changed on the code
            // system branch itself, including the open commit.
            let criteria = self.version_control.branch_criteria_including_open_commit(commit).await?;
            self.find_changed_components_with_bad_integrity_not_fixed_within(&criteria, commit.branch())
                .await?
        } else {
            self.find_changed_components_with_bad_integrity_not_fixed_on_fix_branch(
                commit.branch(),
                &code_system.branch_path,
            )
            .await?
        };
        if report.is_empty() {
            commit
                .branch_mut()
                .metadata
                .map_or_create(INTERNAL_METADATA_KEY)
                .remove(INTEGRITY_ISSUE_METADATA_KEY);
            info!(
                "No integrity issue found on branch {} after commit {}",
                branch_path,
                commit.timepoint()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CommitListener for IntegrityService {
    /// Re-checks integrity when the branch is flagged, clearing the flag
    /// once the branch is clean. Failing to reason about integrity must not
    /// block valid writes: errors are logged, never propagated.
    async fn pre_commit_completion(&self, commit: &mut Commit) -> ServiceResult<()> {
        let flagged = commit
            .branch()
            .metadata
            .get_mapped_string(INTERNAL_METADATA_KEY, INTEGRITY_ISSUE_METADATA_KEY)
            == Some("true");
        if flagged {
            if let Err(e) = self.run_commit_integrity_check(commit).await {
                error!("Integrity check didn't complete successfully. {}", e);
            }
        }
        Ok(())
    }
}

fn terms_of(field: &str, concept_ids: &BTreeSet<i64>) -> Query {
    terms(field, concept_ids.iter().map(|id| Value::from(id.to_string())))
}

fn put_if_inactive(
    concept_id: &str,
    active_concepts: &HashSet<i64>,
    relationship_id: i64,
    map: &mut BTreeMap<i64, i64>,
) -> ServiceResult<()> {
    let concept_id = parse_sctid(concept_id)?;
    if !active_concepts.contains(&concept_id) {
        map.insert(relationship_id, concept_id);
    }
    Ok(())
}
