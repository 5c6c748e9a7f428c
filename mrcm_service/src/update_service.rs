// mrcm_service/src/update_service.rs

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use log::{debug, info};

use concept_service::{ConceptService, DescriptionService, EclQueryService, ReferenceSetMemberService};
use models::component::SnomedComponent;
use models::errors::{parse_sctid, ServiceError, ServiceResult};
use models::{concepts, Entity, ReferenceSetMember};
use versioned_store::branch::DEFAULT_MODULE_ID_METADATA_KEY;
use versioned_store::{
    branch_lock_metadata, term, BoolQuery, BranchCriteria, BranchService, Commit, CommitListener, CommitType,
    TerminologyStore, VersionControlHelper,
};

use crate::generator::MrcmDomainTemplatesAndRuleGenerator;
use crate::loader::MrcmLoader;
use crate::model::{AttributeDomain, AttributeRange, Domain};

const REWRITTEN_ADDITIONAL_FIELDS: [&str; 4] = [
    "rangeConstraint",
    "attributeRule",
    "domainTemplateForPrecoordination",
    "domainTemplateForPostcoordination",
];

/// Commit listener regenerating the MRCM-derived artefacts whenever MRCM
/// refset content changes in a commit.
#[derive(Clone)]
pub struct MrcmUpdateService {
    store: TerminologyStore,
    branch_service: BranchService,
    version_control: VersionControlHelper,
    concept_service: ConceptService,
    description_service: DescriptionService,
    member_service: ReferenceSetMemberService,
    ecl_query_service: EclQueryService,
    loader: MrcmLoader,
    generator: MrcmDomainTemplatesAndRuleGenerator,
}

impl MrcmUpdateService {
    pub fn new(store: TerminologyStore, branch_service: BranchService) -> Self {
        MrcmUpdateService {
            version_control: VersionControlHelper::new(store.clone()),
            concept_service: ConceptService::new(store.clone()),
            description_service: DescriptionService::new(store.clone()),
            member_service: ReferenceSetMemberService::new(store.clone()),
            ecl_query_service: EclQueryService::new(store.clone()),
            loader: MrcmLoader::new(store.clone()),
            generator: MrcmDomainTemplatesAndRuleGenerator::new(),
            store,
            branch_service,
        }
    }

    /// Manual full refresh of every MRCM artefact on a branch.
    pub async fn update_all_domain_templates_and_attribute_rules(&self, path: &str) -> ServiceResult<()> {
        info!("Updating all MRCM domain templates and attribute rules on branch {}.", path);
        let mut commit = self
            .branch_service
            .open_commit(path, &branch_lock_metadata("Updating all MRCM components."))
            .await?;
        match self.perform_update(true, &mut commit).await {
            Ok(()) => {
                commit.mark_successful();
                self.branch_service.close_commit(commit).await?;
            }
            Err(e) => {
                self.branch_service.close_commit(commit).await?;
                return Err(ServiceError::Internal(format!(
                    "Failed to update MRCM domain templates and attribute rules for all components. {}",
                    e
                )));
            }
        }
        info!(
            "Completed updating MRCM domain templates and attribute rules for all components on branch {}.",
            path
        );
        Ok(())
    }

    async fn perform_update(&self, all_components: bool, commit: &mut Commit) -> ServiceResult<()> {
        let branch_path = commit.branch().path.clone();
        if !all_components {
            let changed_members = self.mrcm_refset_components_changed(commit).await?;
            if changed_members.is_empty() {
                debug!("No MRCM refset component changes found on branch {}", branch_path);
                return Ok(());
            }
            info!(
                "{} MRCM component changes found on branch {}",
                changed_members.len(),
                branch_path
            );
        }

        let criteria = self.version_control.branch_criteria_including_open_commit(commit).await?;
        let mrcm = self.loader.load_active_mrcm(&criteria).await?;

        let mut domain_map_by_domain_id: BTreeMap<String, Domain> = BTreeMap::new();
        for domain in &mrcm.domains {
            domain_map_by_domain_id.insert(domain.referenced_component_id.clone(), domain.clone());
        }

        let mut attribute_to_domains: BTreeMap<String, Vec<AttributeDomain>> = BTreeMap::new();
        let mut domain_to_attributes: BTreeMap<String, Vec<AttributeDomain>> = BTreeMap::new();
        let mut domain_ids: BTreeSet<i64> = BTreeSet::new();
        for attribute_domain in &mrcm.attribute_domains {
            domain_ids.insert(parse_sctid(&attribute_domain.domain_id)?);
            attribute_to_domains
                .entry(attribute_domain.referenced_component_id.clone())
                .or_default()
                .push(attribute_domain.clone());
            domain_to_attributes
                .entry(attribute_domain.domain_id.clone())
                .or_default()
                .push(attribute_domain.clone());
        }

        let mut concept_ids: BTreeSet<i64> = domain_ids.clone();
        let mut attribute_to_ranges: BTreeMap<String, Vec<AttributeRange>> = BTreeMap::new();
        for range in &mrcm.attribute_ranges {
            concept_ids.insert(parse_sctid(&range.referenced_component_id)?);
            attribute_to_ranges
                .entry(range.referenced_component_id.clone())
                .or_default()
                .push(range.clone());
        }

        // Short display terms: FSN for domains, preferred term otherwise.
        let mut minis = self.concept_service.find_concept_minis(&criteria, &concept_ids).await?;
        self.description_service.join_active_descriptions(&criteria, &mut minis).await?;
        let mut concept_to_term: BTreeMap<String, String> = BTreeMap::new();
        for (concept_id, mini) in &minis {
            let term = if domain_ids.contains(&parse_sctid(concept_id)?) {
                mini.fsn.clone()
            } else {
                mini.pt.clone()
            };
            concept_to_term.insert(concept_id.clone(), term.unwrap_or_else(|| concept_id.clone()));
        }

        let data_attributes = self
            .ecl_query_service
            .select_concept_ids(&format!("<< {}", concepts::CONCEPT_MODEL_DATA_ATTRIBUTE), &criteria, true)
            .await?;

        let mut to_update: Vec<ReferenceSetMember> = Vec::new();
        to_update.extend(
            self.update_attribute_rules(
                &criteria,
                &domain_map_by_domain_id,
                &attribute_to_domains,
                &attribute_to_ranges,
                &concept_to_term,
                &data_attributes,
            )
            .await?,
        );
        to_update.extend(
            self.update_domain_templates(
                &criteria,
                &domain_map_by_domain_id,
                &domain_to_attributes,
                &attribute_to_ranges,
                &concept_to_term,
                &data_attributes,
            )
            .await?,
        );

        // Refresh effective time, and module when a default is configured.
        let metadata = self.branch_service.find_branch_or_throw(&branch_path).await?.metadata;
        let default_module_id = metadata.get_string(DEFAULT_MODULE_ID_METADATA_KEY).map(str::to_string);
        for member in &mut to_update {
            if let Some(default_module_id) = &default_module_id {
                member.component.module_id = default_module_id.clone();
            }
            member.update_effective_time();
        }

        // Members already written by this commit are rewritten in place to
        // avoid two versions of the same id in a single commit; the rest go
        // through the normal batch save path.
        let timepoint = commit.timepoint();
        let (edited_members, new_members): (Vec<ReferenceSetMember>, Vec<ReferenceSetMember>) = to_update
            .into_iter()
            .partition(|member| member.version.start == Some(timepoint));

        if !edited_members.is_empty() {
            info!("{} reference set members updated via update query", edited_members.len());
            for member in &edited_members {
                let internal_id = member.version.internal_id.ok_or_else(|| {
                    ServiceError::Internal(format!("Member {} has no internal document id", member.member_id))
                })?;
                let mut fields = BTreeMap::new();
                for field_name in REWRITTEN_ADDITIONAL_FIELDS {
                    if let Some(value) = member.additional_field(field_name) {
                        fields.insert(field_name.to_string(), value.to_string());
                    }
                }
                if !fields.is_empty() {
                    self.store
                        .rewrite_additional_fields(ReferenceSetMember::DOC_TYPE, internal_id, &fields)
                        .await?;
                }
            }
            self.store.refresh(ReferenceSetMember::DOC_TYPE).await;
        }

        if !new_members.is_empty() {
            info!("{} reference set members updated in batch", new_members.len());
            self.member_service.do_save_batch_members(commit, new_members).await?;
        }
        Ok(())
    }

    async fn update_attribute_rules(
        &self,
        criteria: &BranchCriteria,
        domain_map_by_domain_id: &BTreeMap<String, Domain>,
        attribute_to_domains: &BTreeMap<String, Vec<AttributeDomain>>,
        attribute_to_ranges: &BTreeMap<String, Vec<AttributeRange>>,
        concept_to_term: &BTreeMap<String, String>,
        data_attributes: &[i64],
    ) -> ServiceResult<Vec<ReferenceSetMember>> {
        let attribute_ranges = self.generator.generate_attribute_rules(
            domain_map_by_domain_id,
            attribute_to_domains,
            attribute_to_ranges,
            concept_to_term,
            data_attributes,
        );
        if !attribute_ranges.is_empty() {
            info!("{} changes generated for attribute rules.", attribute_ranges.len());
        }

        let range_member_ids: BTreeSet<String> = attribute_ranges.iter().map(|range| range.id.clone()).collect();
        let mut range_members = self.member_service.find_members(criteria, &range_member_ids).await?;
        if range_member_ids.len() != range_members.len() {
            return Err(ServiceError::RuntimeState(format!(
                "Not all attribute range members found as expecting {} but only got {}",
                range_member_ids.len(),
                range_members.len()
            )));
        }

        let mut member_id_to_range: BTreeMap<String, AttributeRange> = BTreeMap::new();
        for range in attribute_ranges {
            member_id_to_range.insert(range.id.clone(), range);
        }
        for range_member in &mut range_members {
            let range = &member_id_to_range[&range_member.member_id];
            range_member.mark_changed();
            range_member.set_additional_field("attributeRule", &range.attribute_rule);
            range_member.set_additional_field("rangeConstraint", &range.range_constraint);
        }
        Ok(range_members)
    }

    async fn update_domain_templates(
        &self,
        criteria: &BranchCriteria,
        domain_map_by_domain_id: &BTreeMap<String, Domain>,
        domain_to_attributes: &BTreeMap<String, Vec<AttributeDomain>>,
        attribute_to_ranges: &BTreeMap<String, Vec<AttributeRange>>,
        concept_to_term: &BTreeMap<String, String>,
        data_attributes: &[i64],
    ) -> ServiceResult<Vec<ReferenceSetMember>> {
        let updated_domains = self.generator.generate_domain_templates(
            domain_map_by_domain_id,
            domain_to_attributes,
            attribute_to_ranges,
            concept_to_term,
            data_attributes,
        );
        if !updated_domains.is_empty() {
            info!("{} domain templates updated.", updated_domains.len());
        }

        let domain_member_ids: BTreeSet<String> = updated_domains.iter().map(|domain| domain.id.clone()).collect();
        let mut domain_members = self.member_service.find_members(criteria, &domain_member_ids).await?;
        let mut member_id_to_domain: BTreeMap<String, Domain> = BTreeMap::new();
        for domain in updated_domains {
            member_id_to_domain.insert(domain.id.clone(), domain);
        }
        for domain_member in &mut domain_members {
            let domain = &member_id_to_domain[&domain_member.member_id];
            domain_member.set_additional_field(
                "domainTemplateForPrecoordination",
                &domain.domain_template_for_precoordination,
            );
            domain_member.set_additional_field(
                "domainTemplateForPostcoordination",
                &domain.domain_template_for_postcoordination,
            );
            domain_member.mark_changed();
        }
        Ok(domain_members)
    }

    /// Member ids of MRCM refset rows written by the open commit.
    async fn mrcm_refset_components_changed(&self, commit: &Commit) -> ServiceResult<BTreeSet<String>> {
        let criteria = self.version_control.branch_criteria_changes_within_open_commit(commit);
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
            .must(
                BoolQuery::new()
                    .should(term(
                        ReferenceSetMember::FIELD_REFSET_ID,
                        concepts::REFSET_MRCM_DOMAIN_INTERNATIONAL,
                    ))
                    .should(term(
                        ReferenceSetMember::FIELD_REFSET_ID,
                        concepts::REFSET_MRCM_ATTRIBUTE_DOMAIN_INTERNATIONAL,
                    ))
                    .should(term(
                        ReferenceSetMember::FIELD_REFSET_ID,
                        concepts::REFSET_MRCM_ATTRIBUTE_RANGE_INTERNATIONAL,
                    ))
                    .build(),
            )
            .build();
        let mut changed = BTreeSet::new();
        for member_id in self
            .store
            .search_field(ReferenceSetMember::DOC_TYPE, &query, ReferenceSetMember::FIELD_MEMBER_ID)
            .await
        {
            if let Some(member_id) = member_id.as_str() {
                changed.insert(member_id.to_string());
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl CommitListener for MrcmUpdateService {
    /// Runs on content and rebase commits unless a code system version is
    /// being imported. A failure here is fatal: the commit is rolled back.
    async fn pre_commit_completion(&self, commit: &mut Commit) -> ServiceResult<()> {
        if commit.branch().is_importing_code_system_version() {
            info!("MRCM auto update is disabled on branch {}", commit.branch().path);
            return Ok(());
        }
        if matches!(commit.commit_type(), CommitType::Content | CommitType::Rebase) {
            debug!(
                "Start updating MRCM domain templates and attribute rules on branch {}.",
                commit.branch().path
            );
            self.perform_update(false, commit).await.map_err(|e| {
                ServiceError::RuntimeState(format!("Failed to update MRCM domain templates and attribute rules. {}", e))
            })?;
            debug!(
                "End updating MRCM domain templates and attribute rules on branch {}.",
                commit.branch().path
            );
        }
        Ok(())
    }
}
