// mrcm_service/src/lib.rs

// Declare all top-level modules within the 'mrcm_service' crate
pub mod generator;
pub mod loader;
pub mod model;
pub mod update_service;

// Re-export the service types for convenience
pub use generator::MrcmDomainTemplatesAndRuleGenerator;
pub use loader::MrcmLoader;
pub use model::{AttributeDomain, AttributeRange, ContentType, Domain, Mrcm, RuleStrength};
pub use update_service::MrcmUpdateService;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use models::component::SnomedComponent;
    use models::{concepts, Concept, Description, Entity, ReferenceSetMember};
    use versioned_store::branch::{
        IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY, INTERNAL_METADATA_KEY,
    };
    use versioned_store::{branch_lock_metadata, term, BoolQuery, BranchService, TerminologyStore, VersionControlHelper};

    use crate::update_service::MrcmUpdateService;

    struct Fixture {
        store: TerminologyStore,
        branch_service: BranchService,
        version_control: VersionControlHelper,
    }

    async fn setup_with_listener() -> Fixture {
        let store = TerminologyStore::new();
        let branch_service = BranchService::new(store.clone());
        branch_service.create("MAIN").await.unwrap();
        let update_service = MrcmUpdateService::new(store.clone(), branch_service.clone());
        branch_service.register_commit_listener(Arc::new(update_service)).await;
        Fixture {
            version_control: VersionControlHelper::new(store.clone()),
            store,
            branch_service,
        }
    }

    fn concept(id: &str) -> Concept {
        let mut concept = Concept::new(id, None, true, concepts::CORE_MODULE, concepts::PRIMITIVE);
        concept.mark_changed();
        concept
    }

    fn description(id: &str, concept_id: &str, type_id: &str, term: &str) -> Description {
        let mut description = Description::new(
            id,
            None,
            true,
            concepts::CORE_MODULE,
            concept_id,
            "en",
            type_id,
            term,
            "900000000000448009",
        );
        description.mark_changed();
        description
    }

    fn member(member_id: &str, refset_id: &str, referenced_component: &str, fields: &[(&str, &str)]) -> ReferenceSetMember {
        let mut member = ReferenceSetMember::new(
            member_id,
            None,
            true,
            concepts::CORE_MODULE,
            refset_id,
            referenced_component,
        );
        for (name, value) in fields {
            member.set_additional_field(name, value);
        }
        member.mark_changed();
        member
    }

    fn domain_member() -> ReferenceSetMember {
        member(
            "dm000001-0000-0000-0000-000000000001",
            concepts::REFSET_MRCM_DOMAIN_INTERNATIONAL,
            "404684003",
            &[
                ("domainConstraint", "<< 404684003 |Clinical finding|"),
                ("parentDomain", ""),
                ("proximalPrimitiveConstraint", "<< 404684003"),
                ("proximalPrimitiveRefinement", ""),
                ("domainTemplateForPrecoordination", ""),
                ("domainTemplateForPostcoordination", ""),
            ],
        )
    }

    fn attribute_domain_member(in_group_cardinality: &str) -> ReferenceSetMember {
        member(
            "ad000001-0000-0000-0000-000000000001",
            concepts::REFSET_MRCM_ATTRIBUTE_DOMAIN_INTERNATIONAL,
            "363698007",
            &[
                ("domainId", "404684003"),
                ("grouped", "1"),
                ("attributeCardinality", "0..*"),
                ("attributeInGroupCardinality", in_group_cardinality),
                ("ruleStrengthId", "723597001"),
                ("contentTypeId", "723596005"),
            ],
        )
    }

    fn attribute_range_member() -> ReferenceSetMember {
        member(
            "ar000001-0000-0000-0000-000000000001",
            concepts::REFSET_MRCM_ATTRIBUTE_RANGE_INTERNATIONAL,
            "363698007",
            &[
                ("rangeConstraint", "<< 442083009 |Anatomical or acquired body structure|"),
                ("attributeRule", ""),
                ("ruleStrengthId", "723597001"),
                ("contentTypeId", "723596005"),
            ],
        )
    }

    async fn visible_member(fixture: &Fixture, member_id: &str) -> ReferenceSetMember {
        let criteria = fixture.version_control.branch_criteria_at_path("MAIN").await.unwrap();
        fixture
            .store
            .search::<ReferenceSetMember>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
                    .must(term(ReferenceSetMember::FIELD_MEMBER_ID, member_id))
                    .build(),
            )
            .await
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    async fn seed_mrcm_content(fixture: &Fixture) -> i64 {
        let mut commit = fixture
            .branch_service
            .open_commit("MAIN", &branch_lock_metadata("seed mrcm"))
            .await
            .unwrap();
        let timepoint = commit.timepoint();
        fixture
            .store
            .save_batch(
                &mut commit,
                vec![concept("404684003"), concept("363698007"), concept("442083009")],
            )
            .await
            .unwrap();
        fixture
            .store
            .save_batch(
                &mut commit,
                vec![
                    description("101000011", "404684003", concepts::FSN, "Clinical finding (finding)"),
                    description("101000012", "363698007", concepts::SYNONYM, "Finding site"),
                ],
            )
            .await
            .unwrap();
        fixture
            .store
            .save_batch(
                &mut commit,
                vec![domain_member(), attribute_domain_member("0..1"), attribute_range_member()],
            )
            .await
            .unwrap();
        commit.mark_successful();
        fixture.branch_service.close_commit(commit).await.unwrap();
        timepoint
    }

    #[tokio::test]
    async fn mrcm_changes_regenerate_templates_without_duplicate_versions() {
        let fixture = setup_with_listener().await;
        let timepoint = seed_mrcm_content(&fixture).await;

        // The in-commit rewrite leaves exactly one document version.
        assert_eq!(
            fixture
                .store
                .version_count("member", "MAIN", "dm000001-0000-0000-0000-000000000001")
                .await,
            1
        );
        let domain = visible_member(&fixture, "dm000001-0000-0000-0000-000000000001").await;
        assert_eq!(domain.version.start, Some(timepoint));
        assert_eq!(
            domain.additional_field("domainTemplateForPrecoordination"),
            Some(
                "<< 404684003: { [[0..1]] 363698007 |Finding site| = (<< 442083009 |Anatomical or acquired body structure|) }"
            )
        );

        let range = visible_member(&fixture, "ar000001-0000-0000-0000-000000000001").await;
        let rule = range.additional_field("attributeRule").unwrap();
        assert!(rule.contains("363698007 |Finding site|"));
    }

    #[tokio::test]
    async fn editing_an_mrcm_member_updates_dependent_documents_in_batch() {
        let fixture = setup_with_listener().await;
        seed_mrcm_content(&fixture).await;

        // Tighten the in-group cardinality in a later commit.
        let mut commit = fixture
            .branch_service
            .open_commit("MAIN", &branch_lock_metadata("edit mrcm"))
            .await
            .unwrap();
        fixture
            .store
            .save_batch(&mut commit, vec![attribute_domain_member("1..1")])
            .await
            .unwrap();
        commit.mark_successful();
        fixture.branch_service.close_commit(commit).await.unwrap();

        // The domain member was not part of the commit: it gets a new
        // version through the batch save path.
        assert_eq!(
            fixture
                .store
                .version_count("member", "MAIN", "dm000001-0000-0000-0000-000000000001")
                .await,
            2
        );
        let domain = visible_member(&fixture, "dm000001-0000-0000-0000-000000000001").await;
        assert!(domain
            .additional_field("domainTemplateForPrecoordination")
            .unwrap()
            .contains("[[1..1]]"));
    }

    #[tokio::test]
    async fn commits_without_mrcm_changes_are_left_alone() {
        let fixture = setup_with_listener().await;
        seed_mrcm_content(&fixture).await;
        let domain_before = visible_member(&fixture, "dm000001-0000-0000-0000-000000000001").await;

        let mut commit = fixture
            .branch_service
            .open_commit("MAIN", &branch_lock_metadata("unrelated"))
            .await
            .unwrap();
        fixture.store.save_batch(&mut commit, vec![concept("272379006")]).await.unwrap();
        commit.mark_successful();
        fixture.branch_service.close_commit(commit).await.unwrap();

        let domain_after = visible_member(&fixture, "dm000001-0000-0000-0000-000000000001").await;
        assert_eq!(domain_before, domain_after);
    }

    #[tokio::test]
    async fn mrcm_update_is_disabled_while_importing_a_code_system_version() {
        let fixture = setup_with_listener().await;
        seed_mrcm_content(&fixture).await;

        let main = fixture.branch_service.find_latest("MAIN").await.unwrap();
        let mut metadata = main.metadata.clone();
        metadata
            .map_or_create(INTERNAL_METADATA_KEY)
            .insert(IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY.to_string(), "true".to_string());
        fixture.branch_service.update_metadata("MAIN", metadata).await.unwrap();

        // Editing an MRCM member now leaves the generated artefacts alone.
        let mut commit = fixture
            .branch_service
            .open_commit("MAIN", &branch_lock_metadata("import commit"))
            .await
            .unwrap();
        fixture
            .store
            .save_batch(&mut commit, vec![attribute_domain_member("1..1")])
            .await
            .unwrap();
        commit.mark_successful();
        fixture.branch_service.close_commit(commit).await.unwrap();

        let domain = visible_member(&fixture, "dm000001-0000-0000-0000-000000000001").await;
        assert!(domain
            .additional_field("domainTemplateForPrecoordination")
            .unwrap()
            .contains("[[0..1]]"));
    }
}
