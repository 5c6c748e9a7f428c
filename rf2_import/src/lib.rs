// rf2_import/src/lib.rs

// Declare all top-level modules within the 'rf2_import' crate
pub mod buffers;
pub mod component_factory;
pub mod effective_time;
pub mod full_factory;
pub mod job;
pub mod reader;
pub mod service;

// Re-export the import API for convenience
pub use buffers::{PersistBuffer, FLUSH_INTERVAL};
pub use component_factory::{ImportComponentFactory, STATED_RELATIONSHIPS_TO_SKIP};
pub use effective_time::{effective_time_from_column, is_active, MaxEffectiveTimeCollector};
pub use full_factory::FullImportComponentFactory;
pub use job::{ImportJob, ImportStatus, Rf2ImportConfiguration, Rf2Type};
pub use reader::{ComponentFactory, LoadingProfile, ReleaseImporter, Rf2Archive, Rf2File};
pub use service::ImportService;

#[cfg(test)]
mod tests {
    use concept_service::CodeSystemService;
    use models::component::SnomedComponent;
    use models::{concepts, CodeSystem, Concept, Entity, ReferenceSetMember};
    use versioned_store::{term, BoolQuery, BranchService, TerminologyStore, VersionControlHelper};

    use crate::job::{ImportStatus, Rf2ImportConfiguration, Rf2Type};
    use crate::reader::{Rf2Archive, Rf2File};
    use crate::service::ImportService;

    const CONCEPT_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\tdefinitionStatusId";
    const MEMBER_HEADER: &str = "id\teffectiveTime\tactive\tmoduleId\trefsetId\treferencedComponentId\towlExpression";

    struct Fixture {
        store: TerminologyStore,
        branch_service: BranchService,
        version_control: VersionControlHelper,
        code_system_service: CodeSystemService,
        import_service: ImportService,
    }

    async fn setup() -> Fixture {
        let store = TerminologyStore::new();
        let branch_service = BranchService::new(store.clone());
        branch_service.create("MAIN").await.unwrap();
        let code_system_service = CodeSystemService::new();
        let import_service = ImportService::new(store.clone(), branch_service.clone(), code_system_service.clone());
        Fixture {
            version_control: VersionControlHelper::new(store.clone()),
            store,
            branch_service,
            code_system_service,
            import_service,
        }
    }

    fn concept_delta(rows: &[&str]) -> Rf2Archive {
        let mut content = String::from(CONCEPT_HEADER);
        for row in rows {
            content.push('\n');
            content.push_str(row);
        }
        Rf2Archive::new(vec![Rf2File::new("sct2_Concept_Delta_INT_20230131.txt", &content)])
    }

    async fn visible_concept(fixture: &Fixture, path: &str, concept_id: &str) -> Option<Concept> {
        let criteria = fixture.version_control.branch_criteria_at_path(path).await.unwrap();
        let hits = fixture
            .store
            .search::<Concept>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
                    .must(term(Concept::FIELD_CONCEPT_ID, concept_id))
                    .build(),
            )
            .await
            .unwrap();
        hits.into_iter().next()
    }

    #[tokio::test]
    async fn delta_import_lands_a_released_concept() {
        let fixture = setup().await;
        let archive = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job_id = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        let max_effective_time = fixture.import_service.import_archive(&job_id, &archive).await.unwrap();
        assert_eq!(max_effective_time, Some(20230101));
        assert_eq!(
            fixture.import_service.get_import_job_or_throw(&job_id).await.unwrap().status,
            ImportStatus::Completed
        );

        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert!(concept.component.active);
        assert!(concept.component.released);
        assert_eq!(concept.component.effective_time, Some(20230101));

        // Import metadata is cleared again.
        let main = fixture.branch_service.find_latest("MAIN").await.unwrap();
        assert_eq!(main.metadata.get_mapped_string("internal", "importType"), None);
    }

    #[tokio::test]
    async fn delta_reimport_skips_all_rows_and_writes_nothing() {
        let fixture = setup().await;
        let archive = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let first = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&first, &archive).await.unwrap();

        let second = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&second, &archive).await.unwrap();

        // The suppressed row left no second version behind.
        assert_eq!(fixture.store.version_count("concept", "MAIN", "100000").await, 1);
    }

    #[tokio::test]
    async fn patch_release_version_allows_replacing_that_effective_time_only() {
        let fixture = setup().await;
        let archive = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &archive).await.unwrap();

        // Patch re-import of the same effectiveTime replaces the row.
        let patched = concept_delta(&["100000\t20230101\t0\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(
                Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN").with_patch_release_version(Some(20230101)),
            )
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &patched).await.unwrap();
        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert!(!concept.component.active);

        // A row with a later effectiveTime is protected from the patch.
        let newer = concept_delta(&["100000\t20230201\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &newer).await.unwrap();
        let stale_patch = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(
                Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN").with_patch_release_version(Some(20230101)),
            )
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &stale_patch).await.unwrap();
        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert_eq!(concept.component.effective_time, Some(20230201));
    }

    #[tokio::test]
    async fn snapshot_with_patch_sentinel_accepts_every_row() {
        let fixture = setup().await;
        let delta = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &delta).await.unwrap();

        let mut content = String::from(CONCEPT_HEADER);
        content.push_str("\n100000\t20230101\t0\t900000000000207008\t900000000000074008");
        let snapshot = Rf2Archive::new(vec![Rf2File::new("sct2_Concept_Snapshot_INT_20230131.txt", &content)]);
        let job = fixture
            .import_service
            .create_job(
                Rf2ImportConfiguration::new(Rf2Type::Snapshot, "MAIN").with_patch_release_version(Some(-1)),
            )
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &snapshot).await.unwrap();

        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert!(!concept.component.active);
    }

    #[tokio::test]
    async fn snapshot_module_filter_drops_stale_rows_before_the_buffers() {
        let fixture = setup().await;
        let delta = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &delta).await.unwrap();

        let mut content = String::from(CONCEPT_HEADER);
        content.push_str("\n100000\t20230101\t0\t900000000000207008\t900000000000074008");
        content.push_str("\n100001\t20230201\t1\t900000000000207008\t900000000000074008");
        let snapshot = Rf2Archive::new(vec![Rf2File::new("sct2_Concept_Snapshot_INT_20230228.txt", &content)]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Snapshot, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &snapshot).await.unwrap();

        // The stale row never reached the persist buffer.
        assert_eq!(fixture.store.version_count("concept", "MAIN", "100000").await, 1);
        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert!(concept.component.active);
        assert!(visible_concept(&fixture, "MAIN", "100001").await.is_some());
    }

    #[tokio::test]
    async fn full_import_commits_each_release_and_versions_the_code_system() {
        let fixture = setup().await;
        fixture
            .code_system_service
            .create_code_system(CodeSystem::new("SNOMEDCT", "MAIN"))
            .await
            .unwrap();

        let mut content = String::from(CONCEPT_HEADER);
        content.push_str("\n100000\t20220101\t1\t900000000000207008\t900000000000074008");
        content.push_str("\n100000\t20230101\t0\t900000000000207008\t900000000000074008");
        let archive = Rf2Archive::new(vec![Rf2File::new("sct2_Concept_Full_INT_20230131.txt", &content)]);

        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Full, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &archive).await.unwrap();

        // Each historical version was committed separately.
        assert_eq!(fixture.store.version_count("concept", "MAIN", "100000").await, 2);
        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert!(!concept.component.active);
        assert_eq!(concept.component.effective_time, Some(20230101));

        let versions = fixture.code_system_service.find_versions("SNOMEDCT", true).await;
        assert_eq!(
            versions.iter().map(|v| v.effective_date).collect::<Vec<_>>(),
            vec![20220101, 20230101]
        );
    }

    #[tokio::test]
    async fn full_import_requires_an_empty_root_branch() {
        let fixture = setup().await;
        fixture.branch_service.create("MAIN/project").await.unwrap();
        assert!(fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Full, "MAIN/project"))
            .await
            .is_err());

        let delta = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &delta).await.unwrap();
        assert!(fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Full, "MAIN"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn create_code_system_version_requires_a_code_system() {
        let fixture = setup().await;
        assert!(fixture
            .import_service
            .create_job(
                Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN").with_create_code_system_version(true)
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn members_and_their_concepts_arrive_in_one_commit() {
        let fixture = setup().await;
        let concept_content = format!(
            "{}\n100000\t20230101\t1\t900000000000207008\t900000000000074008",
            CONCEPT_HEADER
        );
        let member_content = format!(
            "{}\n8031bcad-0d32-4ee8-9b27-e2b8e8e3ec65\t20230101\t1\t900000000000207008\t{}\t100000\tSubClassOf(:100000 :138875005)",
            MEMBER_HEADER,
            concepts::OWL_AXIOM_REFERENCE_SET
        );
        let archive = Rf2Archive::new(vec![
            // Member file listed first on purpose; the buffers still flush
            // core components ahead of the dependent kinds.
            Rf2File::new("der2_sRefset_OWLExpressionDelta_INT_20230131.txt", &member_content),
            Rf2File::new("sct2_Concept_Delta_INT_20230131.txt", &concept_content),
        ]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &archive).await.unwrap();

        let criteria = fixture.version_control.branch_criteria_at_path("MAIN").await.unwrap();
        let members = fixture
            .store
            .search::<ReferenceSetMember>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(ReferenceSetMember::DOC_TYPE))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(
            members[0].additional_field(ReferenceSetMember::OWL_EXPRESSION),
            Some("SubClassOf(:100000 :138875005)")
        );
        assert!(visible_concept(&fixture, "MAIN", "100000").await.is_some());
    }

    #[tokio::test]
    async fn failed_import_rolls_back_and_marks_the_job_failed() {
        let fixture = setup().await;
        // Second row is malformed: wrong column count.
        let mut content = String::from(CONCEPT_HEADER);
        content.push_str("\n100000\t20230101\t1\t900000000000207008\t900000000000074008");
        content.push_str("\n100001\t20230101\t1");
        let archive = Rf2Archive::new(vec![Rf2File::new("sct2_Concept_Delta_INT_20230131.txt", &content)]);

        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        assert!(fixture.import_service.import_archive(&job, &archive).await.is_err());
        assert_eq!(
            fixture.import_service.get_import_job_or_throw(&job).await.unwrap().status,
            ImportStatus::Failed
        );
        assert!(visible_concept(&fixture, "MAIN", "100000").await.is_none());
        assert_eq!(fixture.store.version_count("concept", "MAIN", "100000").await, 0);

        // Import metadata was cleared on the failure path too.
        let main = fixture.branch_service.find_latest("MAIN").await.unwrap();
        assert_eq!(main.metadata.get_mapped_string("internal", "importType"), None);
    }

    #[tokio::test]
    async fn stated_relationship_skip_list_drops_known_duplicates() {
        let fixture = setup().await;
        let header = "id\teffectiveTime\tactive\tmoduleId\tsourceId\tdestinationId\trelationshipGroup\ttypeId\tcharacteristicTypeId\tmodifierId";
        let content = format!(
            "{}\n3187444026\t20230101\t1\t900000000000207008\t100000\t138875005\t0\t116680003\t{}\t900000000000451002\n\
             200001\t20230101\t1\t900000000000207008\t100000\t138875005\t0\t116680003\t{}\t900000000000451002",
            header,
            concepts::STATED_RELATIONSHIP,
            concepts::STATED_RELATIONSHIP
        );
        let archive = Rf2Archive::new(vec![Rf2File::new("sct2_StatedRelationship_Delta_INT_20230131.txt", &content)]);
        let job = fixture
            .import_service
            .create_job(Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN"))
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &archive).await.unwrap();

        assert_eq!(fixture.store.version_count("relationship", "MAIN", "3187444026").await, 0);
        assert_eq!(fixture.store.version_count("relationship", "MAIN", "200001").await, 1);
    }

    #[tokio::test]
    async fn patcher_counts_each_suppressed_row() {
        use crate::component_factory::process_entities;
        use crate::effective_time::MaxEffectiveTimeCollector;
        use versioned_store::branch_lock_metadata;

        let fixture = setup().await;
        let mut commit = fixture
            .branch_service
            .open_commit("MAIN", &branch_lock_metadata("seed"))
            .await
            .unwrap();
        let mut existing = Concept::new("100000", Some(20230101), true, "900000000000207008", "900000000000074008");
        existing.release(20230101);
        existing.mark_changed();
        fixture.store.save_batch(&mut commit, vec![existing]).await.unwrap();
        commit.mark_successful();
        fixture.branch_service.close_commit(commit).await.unwrap();

        let criteria = fixture.version_control.branch_criteria_at_path("MAIN").await.unwrap();
        let mut incoming = Concept::new("100000", Some(20230101), true, "900000000000207008", "900000000000074008");
        incoming.release(20230101);
        let mut collector = MaxEffectiveTimeCollector::new();
        let (kept, skipped) = process_entities(
            &fixture.store,
            &criteria,
            None,
            false,
            false,
            false,
            &mut collector,
            vec![incoming],
        )
        .await
        .unwrap();
        assert!(kept.is_empty());
        assert_eq!(skipped, 1);
        assert_eq!(collector.max_effective_time(), Some(20230101));
    }

    #[tokio::test]
    async fn clear_effective_times_blanks_the_release_envelope() {
        let fixture = setup().await;
        let archive = concept_delta(&["100000\t20230101\t1\t900000000000207008\t900000000000074008"]);
        let job = fixture
            .import_service
            .create_job(
                Rf2ImportConfiguration::new(Rf2Type::Delta, "MAIN").with_clear_effective_times(true),
            )
            .await
            .unwrap();
        fixture.import_service.import_archive(&job, &archive).await.unwrap();

        let concept = visible_concept(&fixture, "MAIN", "100000").await.unwrap();
        assert_eq!(concept.component.effective_time, None);
        assert!(!concept.component.released);
        assert_eq!(concept.component.release_hash, None);
    }
}
