// rf2_import/src/component_factory.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::{debug, info};

use concept_service::{ConceptService, IdentifierService, ReferenceSetMemberService};
use models::component::{SnomedComponent, FIELD_EFFECTIVE_TIME, FIELD_RELEASED};
use models::errors::{parse_sctid, ServiceError, ServiceResult};
use models::{concepts, Concept, Description, Entity, Identifier, ReferenceSetMember, Relationship};
use serde_json::Value;
use versioned_store::{
    branch_lock_metadata, range_gt, range_gte, term, terms, BoolQuery, BranchCriteria, BranchService,
    Commit, TerminologyStore, VersionControlHelper, LARGE_PAGE,
};

use crate::buffers::PersistBuffer;
use crate::effective_time::{effective_time_from_column, is_active, MaxEffectiveTimeCollector};
use crate::reader::ComponentFactory;

/// A small number of stated relationships also appear in the inferred
/// file; they are dropped from the stated stream to avoid double
/// ingestion.
pub const STATED_RELATIONSHIPS_TO_SKIP: [i64; 3] = [3187444026, 3192499027, 3574321020];

/// Column offset where refset-specific additional fields begin.
pub const MEMBER_ADDITIONAL_FIELD_OFFSET: usize = 6;

/// Component factory for delta and snapshot imports: buffers rows per
/// kind, applies the effective-time patch semantics and writes batches
/// into one open commit.
pub struct ImportComponentFactory {
    branch_service: BranchService,
    version_control: VersionControlHelper,
    store: TerminologyStore,
    concept_service: ConceptService,
    member_service: ReferenceSetMemberService,
    identifier_service: IdentifierService,
    path: String,
    patch_release_version: Option<i32>,
    copy_release_fields: bool,
    clear_effective_times: bool,
    module_effective_time_filter_in_use: bool,
    commit: Option<Commit>,
    branch_criteria_before_open_commit: Option<BranchCriteria>,
    concept_buffer: PersistBuffer<Concept>,
    description_buffer: PersistBuffer<Description>,
    relationship_buffer: PersistBuffer<Relationship>,
    identifier_buffer: PersistBuffer<Identifier>,
    member_buffer: PersistBuffer<ReferenceSetMember>,
    /// One-way latch: core components must be flushed once before the
    /// first dependent flush. Observed by concurrent readers, set once.
    core_components_flushed: AtomicBool,
    max_effective_time_collector: MaxEffectiveTimeCollector,
    component_type_skipped_map: BTreeMap<String, u64>,
}

impl ImportComponentFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: TerminologyStore,
        branch_service: BranchService,
        version_control: VersionControlHelper,
        concept_service: ConceptService,
        member_service: ReferenceSetMemberService,
        identifier_service: IdentifierService,
        path: &str,
        patch_release_version: Option<i32>,
        copy_release_fields: bool,
        clear_effective_times: bool,
    ) -> Self {
        ImportComponentFactory {
            branch_service,
            version_control,
            store,
            concept_service,
            member_service,
            identifier_service,
            path: path.to_string(),
            patch_release_version,
            copy_release_fields,
            clear_effective_times,
            module_effective_time_filter_in_use: false,
            commit: None,
            branch_criteria_before_open_commit: None,
            concept_buffer: PersistBuffer::new(),
            description_buffer: PersistBuffer::new(),
            relationship_buffer: PersistBuffer::new(),
            identifier_buffer: PersistBuffer::new(),
            member_buffer: PersistBuffer::new(),
            core_components_flushed: AtomicBool::new(false),
            max_effective_time_collector: MaxEffectiveTimeCollector::new(),
            component_type_skipped_map: BTreeMap::new(),
        }
    }

    /// Snapshot imports pre-filter rows per module in the reader; the
    /// effective-time patcher is suppressed while that filter is active.
    pub fn use_module_effective_time_filter(&mut self, in_use: bool) {
        self.module_effective_time_filter_in_use = in_use;
    }

    pub fn max_effective_time(&self) -> Option<i32> {
        self.max_effective_time_collector.max_effective_time()
    }

    /// The open commit, surrendered to the caller for rollback handling.
    pub fn take_commit(&mut self) -> Option<Commit> {
        self.commit.take()
    }

    pub(crate) fn has_open_commit(&self) -> bool {
        self.commit.is_some()
    }

    pub(crate) async fn open_import_commit(&mut self) -> ServiceResult<()> {
        let commit = self
            .branch_service
            .open_commit(&self.path, &branch_lock_metadata("Loading components from RF2 import."))
            .await?;
        self.branch_criteria_before_open_commit =
            Some(self.version_control.branch_criteria_before_open_commit(&commit).await?);
        self.commit = Some(commit);
        Ok(())
    }

    pub(crate) async fn complete_import_commit(&mut self) -> ServiceResult<()> {
        for (component_type, skipped) in &self.component_type_skipped_map {
            info!(
                "{} components of type {} were not imported because a newer version was found.",
                skipped, component_type
            );
        }
        self.component_type_skipped_map.clear();

        let concepts = self.concept_buffer.drain();
        self.persist_concepts(concepts).await?;
        let descriptions = self.description_buffer.drain();
        self.persist_descriptions(descriptions).await?;
        let relationships = self.relationship_buffer.drain();
        self.persist_relationships(relationships).await?;
        let members = self.member_buffer.drain();
        self.persist_members(members).await?;
        let identifiers = self.identifier_buffer.drain();
        self.persist_identifiers(identifiers).await?;

        let mut commit = self
            .commit
            .take()
            .ok_or_else(|| ServiceError::RuntimeState("No open import commit to complete".to_string()))?;
        self.branch_criteria_before_open_commit = None;
        self.core_components_flushed.store(false, Ordering::Release);
        commit.mark_successful();
        self.branch_service.close_commit(commit).await
    }

    fn before_commit_criteria(&self) -> ServiceResult<BranchCriteria> {
        self.branch_criteria_before_open_commit
            .clone()
            .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))
    }

    fn add_skipped(&mut self, component_type: &str, skipped: u64) {
        if skipped > 0 {
            *self
                .component_type_skipped_map
                .entry(component_type.to_string())
                .or_default() += skipped;
        }
    }

    async fn persist_concepts(&mut self, batch: Vec<Concept>) -> ServiceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let criteria = self.before_commit_criteria()?;
        let (batch, skipped) = process_entities(
            &self.store,
            &criteria,
            self.patch_release_version,
            self.copy_release_fields,
            self.clear_effective_times,
            self.module_effective_time_filter_in_use,
            &mut self.max_effective_time_collector,
            batch,
        )
        .await?;
        self.add_skipped("Concept", skipped);
        if !batch.is_empty() {
            let commit = self
                .commit
                .as_mut()
                .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))?;
            self.concept_service.do_save_batch_concepts(commit, batch).await?;
        }
        Ok(())
    }

    async fn persist_descriptions(&mut self, batch: Vec<Description>) -> ServiceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let criteria = self.before_commit_criteria()?;
        let (batch, skipped) = process_entities(
            &self.store,
            &criteria,
            self.patch_release_version,
            self.copy_release_fields,
            self.clear_effective_times,
            self.module_effective_time_filter_in_use,
            &mut self.max_effective_time_collector,
            batch,
        )
        .await?;
        self.add_skipped("Description", skipped);
        if !batch.is_empty() {
            let commit = self
                .commit
                .as_mut()
                .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))?;
            self.concept_service.do_save_batch_descriptions(commit, batch).await?;
        }
        Ok(())
    }

    async fn persist_relationships(&mut self, batch: Vec<Relationship>) -> ServiceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let criteria = self.before_commit_criteria()?;
        let (batch, skipped) = process_entities(
            &self.store,
            &criteria,
            self.patch_release_version,
            self.copy_release_fields,
            self.clear_effective_times,
            self.module_effective_time_filter_in_use,
            &mut self.max_effective_time_collector,
            batch,
        )
        .await?;
        self.add_skipped("Relationship", skipped);
        if !batch.is_empty() {
            let commit = self
                .commit
                .as_mut()
                .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))?;
            self.concept_service.do_save_batch_relationships(commit, batch).await?;
        }
        Ok(())
    }

    async fn persist_identifiers(&mut self, batch: Vec<Identifier>) -> ServiceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_core_components_flushed().await?;
        let criteria = self.before_commit_criteria()?;
        let (batch, skipped) = process_entities(
            &self.store,
            &criteria,
            self.patch_release_version,
            self.copy_release_fields,
            self.clear_effective_times,
            self.module_effective_time_filter_in_use,
            &mut self.max_effective_time_collector,
            batch,
        )
        .await?;
        self.add_skipped("Identifier", skipped);
        if !batch.is_empty() {
            let commit = self
                .commit
                .as_mut()
                .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))?;
            self.identifier_service.do_save_batch_identifiers(commit, batch).await?;
        }
        Ok(())
    }

    async fn persist_members(&mut self, batch: Vec<ReferenceSetMember>) -> ServiceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ensure_core_components_flushed().await?;
        let criteria = self.before_commit_criteria()?;
        let (batch, skipped) = process_entities(
            &self.store,
            &criteria,
            self.patch_release_version,
            self.copy_release_fields,
            self.clear_effective_times,
            self.module_effective_time_filter_in_use,
            &mut self.max_effective_time_collector,
            batch,
        )
        .await?;
        self.add_skipped("ReferenceSetMember", skipped);
        if !batch.is_empty() {
            let commit = self
                .commit
                .as_mut()
                .ok_or_else(|| ServiceError::RuntimeState("Import commit is not open".to_string()))?;
            self.member_service.do_save_batch_members(commit, batch).await?;
        }
        Ok(())
    }

    /// Dependent kinds must never land in the index before the components
    /// they reference: flush every core buffer exactly once before the
    /// first dependent flush.
    async fn ensure_core_components_flushed(&mut self) -> ServiceResult<()> {
        if !self.core_components_flushed.load(Ordering::Acquire) {
            debug!("Flushing core component buffers before first dependent flush");
            let concepts = self.concept_buffer.drain();
            self.persist_concepts(concepts).await?;
            let descriptions = self.description_buffer.drain();
            self.persist_descriptions(descriptions).await?;
            let relationships = self.relationship_buffer.drain();
            self.persist_relationships(relationships).await?;
            self.core_components_flushed.store(true, Ordering::Release);
        }
        Ok(())
    }
}

#[async_trait]
impl ComponentFactory for ImportComponentFactory {
    async fn loading_components_starting(&mut self) -> ServiceResult<()> {
        self.open_import_commit().await
    }

    async fn loading_components_completed(&mut self) -> ServiceResult<()> {
        self.complete_import_commit().await
    }

    async fn new_concept_state(
        &mut self,
        concept_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        definition_status_id: &str,
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let mut concept = Concept::new(concept_id, effective_time, is_active(active), module_id, definition_status_id);
        if let Some(effective_time) = effective_time {
            concept.release(effective_time);
        }
        if let Some(batch) = self.concept_buffer.save(concept) {
            self.persist_concepts(batch).await?;
        }
        Ok(())
    }

    async fn new_relationship_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        destination_id: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let group: i32 = relationship_group
            .parse()
            .map_err(|_| ServiceError::Conversion(format!("Invalid relationship group '{}'", relationship_group)))?;
        let mut relationship = Relationship::new(
            id,
            effective_time,
            is_active(active),
            module_id,
            source_id,
            destination_id,
            group,
            type_id,
            characteristic_type_id,
            modifier_id,
        );
        if let Some(effective_time) = effective_time {
            relationship.release(effective_time);
        }

        if relationship.characteristic_type_id == concepts::STATED_RELATIONSHIP {
            if let Ok(relationship_id) = parse_sctid(id) {
                if STATED_RELATIONSHIPS_TO_SKIP.contains(&relationship_id) {
                    // Known duplicates of the inferred file; not persisted.
                    return Ok(());
                }
            }
        }

        if let Some(batch) = self.relationship_buffer.save(relationship) {
            self.persist_relationships(batch).await?;
        }
        Ok(())
    }

    async fn new_concrete_relationship_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        value: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let group: i32 = relationship_group
            .parse()
            .map_err(|_| ServiceError::Conversion(format!("Invalid relationship group '{}'", relationship_group)))?;
        let mut relationship = Relationship::new_concrete(
            id,
            effective_time,
            is_active(active),
            module_id,
            source_id,
            value,
            group,
            type_id,
            characteristic_type_id,
            modifier_id,
        );
        if let Some(effective_time) = effective_time {
            relationship.release(effective_time);
        }
        if let Some(batch) = self.relationship_buffer.save(relationship) {
            self.persist_relationships(batch).await?;
        }
        Ok(())
    }

    async fn new_description_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        concept_id: &str,
        language_code: &str,
        type_id: &str,
        term: &str,
        case_significance_id: &str,
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let mut description = Description::new(
            id,
            effective_time,
            is_active(active),
            module_id,
            concept_id,
            language_code,
            type_id,
            term,
            case_significance_id,
        );
        if let Some(effective_time) = effective_time {
            description.release(effective_time);
        }
        if let Some(batch) = self.description_buffer.save(description) {
            self.persist_descriptions(batch).await?;
        }
        Ok(())
    }

    async fn new_identifier_state(
        &mut self,
        alternate_identifier: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let mut identifier = Identifier::new(
            alternate_identifier,
            effective_time,
            is_active(active),
            module_id,
            identifier_scheme_id,
            referenced_component_id,
        );
        if let Some(effective_time) = effective_time {
            identifier.release(effective_time);
        }
        if let Some(batch) = self.identifier_buffer.save(identifier) {
            self.persist_identifiers(batch).await?;
        }
        Ok(())
    }

    async fn new_reference_set_member_state(
        &mut self,
        field_names: &[String],
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        refset_id: &str,
        referenced_component_id: &str,
        other_values: &[String],
    ) -> ServiceResult<()> {
        let effective_time = effective_time_from_column(effective_time);
        let mut member = ReferenceSetMember::new(
            id,
            effective_time,
            is_active(active),
            module_id,
            refset_id,
            referenced_component_id,
        );
        for (index, field_name) in field_names.iter().enumerate().skip(MEMBER_ADDITIONAL_FIELD_OFFSET) {
            let value = other_values
                .get(index - MEMBER_ADDITIONAL_FIELD_OFFSET)
                .map(String::as_str)
                .unwrap_or("");
            member.set_additional_field(field_name, value);
        }
        if let Some(effective_time) = effective_time {
            member.release(effective_time);
        }
        if let Some(batch) = self.member_buffer.save(member) {
            self.persist_members(batch).await?;
        }
        Ok(())
    }
}

/// Shared per-batch processing: mark changed, optionally blank the release
/// envelope, drop rows already covered by a newer or equal effectiveTime
/// on the branch snapshot, and inherit release fields onto unreleased
/// rows.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn process_entities<T: SnomedComponent>(
    store: &TerminologyStore,
    branch_criteria_before_open_commit: &BranchCriteria,
    patch_release_version: Option<i32>,
    copy_release_fields: bool,
    clear_effective_times: bool,
    module_effective_time_filter_in_use: bool,
    max_effective_time_collector: &mut MaxEffectiveTimeCollector,
    mut components: Vec<T>,
) -> ServiceResult<(Vec<T>, u64)> {
    let mut effective_date_map: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for component in components.iter_mut() {
        component.mark_changed();
        if clear_effective_times {
            component.clear_release_details();
        }
        if let Some(effective_time) = component.component().effective_time {
            effective_date_map.entry(effective_time).or_default().push(component.id());
            max_effective_time_collector.add(effective_time);
        }
    }

    let mut skipped = 0u64;
    // patchReleaseVersion == -1 is a sentinel allowing any effectiveTime to
    // be replaced; the module filter means the reader has already dropped
    // stale rows.
    if !module_effective_time_filter_in_use && patch_release_version != Some(-1) {
        for (effective_time, ids) in &effective_date_map {
            let replacement_of_this_effective_time_allowed = patch_release_version == Some(*effective_time);
            let range = if replacement_of_this_effective_time_allowed {
                range_gt(FIELD_EFFECTIVE_TIME, *effective_time as i64)
            } else {
                range_gte(FIELD_EFFECTIVE_TIME, *effective_time as i64)
            };
            let query = BoolQuery::new()
                .must(branch_criteria_before_open_commit.entity_branch_criteria(T::DOC_TYPE))
                .must(terms(T::ID_FIELD, ids.iter().map(|id| Value::from(id.as_str()))))
                .must(range)
                .build();
            let already_existing: HashSet<String> = store
                .search_field(T::DOC_TYPE, &query, T::ID_FIELD)
                .await
                .into_iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect();
            if !already_existing.is_empty() {
                skipped += already_existing.len() as u64;
                components.retain(|component| !already_existing.contains(&component.id()));
            }
        }
    }

    if copy_release_fields {
        let unreleased: HashMap<String, usize> = components
            .iter()
            .enumerate()
            .filter(|(_, component)| component.component().effective_time.is_none())
            .map(|(index, component)| (component.id(), index))
            .collect();
        if !unreleased.is_empty() {
            let query = BoolQuery::new()
                .must(branch_criteria_before_open_commit.entity_branch_criteria(T::DOC_TYPE))
                .must(term(FIELD_RELEASED, true))
                .must(terms(T::ID_FIELD, unreleased.keys().map(|id| Value::from(id.as_str()))))
                .build();
            let mut stream = store.search_stream::<T>(&query, LARGE_PAGE).await?;
            while let Some(released_version) = stream.next_hit() {
                if let Some(&index) = unreleased.get(&released_version.id()) {
                    components[index].copy_release_details(&released_version);
                    components[index].update_effective_time();
                }
            }
        }
    }

    Ok((components, skipped))
}
