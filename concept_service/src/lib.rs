// concept_service/src/lib.rs

// Declare all top-level modules within the 'concept_service' crate
pub mod axioms;
pub mod code_systems;
pub mod concepts;
pub mod descriptions;
pub mod ecl;
pub mod effective_times;
pub mod members;

// Re-export the services for convenience
pub use axioms::AxiomConversionService;
pub use code_systems::CodeSystemService;
pub use concepts::ConceptService;
pub use descriptions::DescriptionService;
pub use ecl::EclQueryService;
pub use effective_times::MostRecentEffectiveTimeFinder;
pub use members::{IdentifierService, ReferenceSetMemberService};

#[cfg(test)]
mod tests {
    use models::component::SnomedComponent;
    use models::{concepts, Concept, Description, Entity, QueryConcept};
    use versioned_store::{branch_lock_metadata, BranchService, TerminologyStore, VersionControlHelper};

    use crate::concepts::ConceptService;
    use crate::descriptions::DescriptionService;
    use crate::ecl::EclQueryService;

    async fn setup() -> (TerminologyStore, BranchService, VersionControlHelper) {
        let store = TerminologyStore::new();
        let branch_service = BranchService::new(store.clone());
        branch_service.create("MAIN").await.unwrap();
        let helper = VersionControlHelper::new(store.clone());
        (store, branch_service, helper)
    }

    #[tokio::test]
    async fn active_concepts_exclude_inactive_versions() {
        let (store, branch_service, helper) = setup().await;
        let mut commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        let mut active = Concept::new("100000", None, true, concepts::CORE_MODULE, concepts::PRIMITIVE);
        active.mark_changed();
        let mut inactive = Concept::new("100001", None, false, concepts::CORE_MODULE, concepts::PRIMITIVE);
        inactive.mark_changed();
        store.save_batch(&mut commit, vec![active, inactive]).await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();

        let concept_service = ConceptService::new(store.clone());
        let branch = branch_service.find_latest("MAIN").await.unwrap();
        let criteria = helper.branch_criteria(&branch).await.unwrap();
        let active_ids = concept_service.find_all_active_concepts(&criteria).await.unwrap();
        assert!(active_ids.contains(&100000));
        assert!(!active_ids.contains(&100001));
    }

    #[tokio::test]
    async fn description_join_attaches_fsn_and_pt() {
        let (store, branch_service, helper) = setup().await;
        let mut commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        let fsn = Description::new(
            "101000011",
            None,
            true,
            concepts::CORE_MODULE,
            "100000",
            "en",
            concepts::FSN,
            "Bleeding (finding)",
            "900000000000448009",
        );
        let synonym = Description::new(
            "101000012",
            None,
            true,
            concepts::CORE_MODULE,
            "100000",
            "en",
            concepts::SYNONYM,
            "Bleeding",
            "900000000000448009",
        );
        store.save_batch(&mut commit, vec![fsn, synonym]).await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();

        let branch = branch_service.find_latest("MAIN").await.unwrap();
        let criteria = helper.branch_criteria(&branch).await.unwrap();
        let mut minis = std::collections::BTreeMap::new();
        minis.insert("100000".to_string(), models::ConceptMini::new("100000"));
        DescriptionService::new(store.clone())
            .join_active_descriptions(&criteria, &mut minis)
            .await
            .unwrap();
        let mini = minis.get("100000").unwrap();
        assert_eq!(mini.fsn.as_deref(), Some("Bleeding (finding)"));
        assert_eq!(mini.pt.as_deref(), Some("Bleeding"));
    }

    #[tokio::test]
    async fn descendant_or_self_ecl_uses_the_semantic_index() {
        let (store, branch_service, helper) = setup().await;
        let mut commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        let mut root = QueryConcept::new(762706009, true);
        root.parents.insert(138875005);
        let mut child = QueryConcept::new(3871000000000, true);
        child.ancestors.insert(762706009);
        let unrelated = QueryConcept::new(404684003, true);
        store.save_batch(&mut commit, vec![root, child, unrelated]).await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();

        let branch = branch_service.find_latest("MAIN").await.unwrap();
        let criteria = helper.branch_criteria(&branch).await.unwrap();
        let results = EclQueryService::new(store.clone())
            .select_concept_ids("<< 762706009", &criteria, true)
            .await
            .unwrap();
        assert_eq!(results, vec![762706009, 3871000000000]);

        assert!(EclQueryService::new(store)
            .select_concept_ids("< 762706009", &criteria, true)
            .await
            .is_err());
    }
}
