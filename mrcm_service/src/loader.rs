// mrcm_service/src/loader.rs

use log::warn;
use models::component::FIELD_ACTIVE;
use models::errors::ServiceResult;
use models::{concepts, Entity, ReferenceSetMember};
use versioned_store::{term, BoolQuery, BranchCriteria, TerminologyStore, LARGE_PAGE};

use crate::model::{AttributeDomain, AttributeRange, ContentType, Domain, Mrcm, RuleStrength};

/// Loads the active MRCM rulebook from its three reference sets.
#[derive(Clone)]
pub struct MrcmLoader {
    store: TerminologyStore,
}

impl MrcmLoader {
    pub fn new(store: TerminologyStore) -> Self {
        MrcmLoader { store }
    }

    pub async fn load_active_mrcm(&self, criteria: &BranchCriteria) -> ServiceResult<Mrcm> {
        let mut mrcm = Mrcm::default();
        for member in self.active_members(criteria, concepts::REFSET_MRCM_DOMAIN_INTERNATIONAL).await? {
            mrcm.domains.push(Domain {
                id: member.member_id.clone(),
                referenced_component_id: member.referenced_component_id.clone(),
                domain_constraint: field(&member, "domainConstraint"),
                parent_domain: field(&member, "parentDomain"),
                proximal_primitive_constraint: field(&member, "proximalPrimitiveConstraint"),
                proximal_primitive_refinement: field(&member, "proximalPrimitiveRefinement"),
                domain_template_for_precoordination: field(&member, "domainTemplateForPrecoordination"),
                domain_template_for_postcoordination: field(&member, "domainTemplateForPostcoordination"),
            });
        }
        for member in self
            .active_members(criteria, concepts::REFSET_MRCM_ATTRIBUTE_DOMAIN_INTERNATIONAL)
            .await?
        {
            let (Some(rule_strength), Some(content_type)) = parse_strength_and_content(&member) else {
                continue;
            };
            mrcm.attribute_domains.push(AttributeDomain {
                id: member.member_id.clone(),
                referenced_component_id: member.referenced_component_id.clone(),
                domain_id: field(&member, "domainId"),
                grouped: field(&member, "grouped") == "1",
                attribute_cardinality: field(&member, "attributeCardinality"),
                attribute_in_group_cardinality: field(&member, "attributeInGroupCardinality"),
                rule_strength,
                content_type,
            });
        }
        for member in self
            .active_members(criteria, concepts::REFSET_MRCM_ATTRIBUTE_RANGE_INTERNATIONAL)
            .await?
        {
            let (Some(rule_strength), Some(content_type)) = parse_strength_and_content(&member) else {
                continue;
            };
            mrcm.attribute_ranges.push(AttributeRange {
                id: member.member_id.clone(),
                referenced_component_id: member.referenced_component_id.clone(),
                range_constraint: field(&member, "rangeConstraint"),
                attribute_rule: field(&member, "attributeRule"),
                rule_strength,
                content_type,
            });
        }
        Ok(mrcm)
    }

    async fn active_members(
        &self,
        criteria: &BranchCriteria,
        refset_id: &str,
    ) -> ServiceResult<Vec<ReferenceSetMember>> {
        let query = BoolQuery::new()
            .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
            .must(term(FIELD_ACTIVE, true))
            .must(term(ReferenceSetMember::FIELD_REFSET_ID, refset_id))
            .build();
        let mut stream = self
            .store
            .search_stream::<ReferenceSetMember>(&query, LARGE_PAGE)
            .await?;
        let mut members = Vec::new();
        while let Some(member) = stream.next_hit() {
            members.push(member);
        }
        members.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        Ok(members)
    }
}

fn field(member: &ReferenceSetMember, name: &str) -> String {
    member.additional_field(name).unwrap_or_default().to_string()
}

fn parse_strength_and_content(member: &ReferenceSetMember) -> (Option<RuleStrength>, Option<ContentType>) {
    let rule_strength = RuleStrength::from_concept_id(&field(member, "ruleStrengthId"));
    let content_type = ContentType::from_concept_id(&field(member, "contentTypeId"));
    if rule_strength.is_none() || content_type.is_none() {
        warn!(
            "Skipping MRCM member {} with unrecognised rule strength or content type",
            member.member_id
        );
    }
    (rule_strength, content_type)
}
