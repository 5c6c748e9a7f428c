// versioned_store/src/lib.rs

// Declare all top-level modules within the 'versioned_store' crate
pub mod branch;
pub mod commit;
pub mod criteria;
pub mod engine;
pub mod path_util;
pub mod query;
pub mod service;
pub mod util;

// Re-export the core types for convenience
pub use branch::{Branch, Metadata, MetadataValue};
pub use commit::{Commit, CommitType};
pub use criteria::BranchCriteria;
pub use engine::{SearchStream, TerminologyStore, LARGE_PAGE};
pub use query::{exists, not_exists, range_gt, range_gte, range_lte, term, terms, BoolQuery, Query};
pub use service::{branch_lock_metadata, BranchService, CommitListener, VersionControlHelper};
pub use util::Timer;

#[cfg(test)]
mod tests {
    use models::component::SnomedComponent;
    use models::Concept;
    use models::Entity;

    use crate::branch::Branch;
    use crate::engine::TerminologyStore;
    use crate::query::{term, BoolQuery};
    use crate::service::{branch_lock_metadata, BranchService, VersionControlHelper};

    fn concept(id: &str, active: bool) -> Concept {
        let mut concept = Concept::new(id, None, active, "900000000000207008", "900000000000074008");
        concept.mark_changed();
        concept
    }

    async fn setup() -> (TerminologyStore, BranchService, VersionControlHelper) {
        let store = TerminologyStore::new();
        let branch_service = BranchService::new(store.clone());
        let helper = VersionControlHelper::new(store.clone());
        branch_service.create("MAIN").await.unwrap();
        (store, branch_service, helper)
    }

    async fn commit_concepts(
        store: &TerminologyStore,
        branch_service: &BranchService,
        path: &str,
        concepts: Vec<Concept>,
    ) {
        let mut commit = branch_service
            .open_commit(path, &branch_lock_metadata("test"))
            .await
            .unwrap();
        store.save_batch(&mut commit, concepts).await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();
    }

    async fn visible_concepts(
        store: &TerminologyStore,
        helper: &VersionControlHelper,
        branch: &Branch,
    ) -> Vec<Concept> {
        let criteria = helper.branch_criteria(branch).await.unwrap();
        store
            .search::<Concept>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
                    .build(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn committed_rows_are_visible_and_uncommitted_rows_roll_back() {
        let (store, branch_service, helper) = setup().await;
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100000", true)]).await;

        let main = branch_service.find_latest("MAIN").await.unwrap();
        assert_eq!(visible_concepts(&store, &helper, &main).await.len(), 1);

        // A commit closed without success leaves no trace.
        let mut failed = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        store
            .save_batch(&mut failed, vec![concept("100001", true)])
            .await
            .unwrap();
        branch_service.close_commit(failed).await.unwrap();

        let main = branch_service.find_latest("MAIN").await.unwrap();
        let visible = visible_concepts(&store, &helper, &main).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].concept_id, "100000");
    }

    #[tokio::test]
    async fn second_write_in_one_commit_rewrites_in_place() {
        let (store, branch_service, _) = setup().await;
        let mut commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        store.save_batch(&mut commit, vec![concept("100000", true)]).await.unwrap();
        store.save_batch(&mut commit, vec![concept("100000", false)]).await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();

        assert_eq!(store.version_count("concept", "MAIN", "100000").await, 1);
    }

    #[tokio::test]
    async fn child_branch_sees_parent_content_from_its_base_only() {
        let (store, branch_service, helper) = setup().await;
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100000", true)]).await;
        branch_service.create("MAIN/project").await.unwrap();

        // Content committed to MAIN after the branch point stays invisible.
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100001", true)]).await;

        let project = branch_service.find_latest("MAIN/project").await.unwrap();
        let visible = visible_concepts(&store, &helper, &project).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].concept_id, "100000");
    }

    #[tokio::test]
    async fn branch_edit_shadows_the_parent_version() {
        let (store, branch_service, helper) = setup().await;
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100000", true)]).await;
        branch_service.create("MAIN/project").await.unwrap();
        commit_concepts(&store, &branch_service, "MAIN/project", vec![concept("100000", false)]).await;

        let project = branch_service.find_latest("MAIN/project").await.unwrap();
        let visible = visible_concepts(&store, &helper, &project).await;
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].component.active);

        // The parent keeps its own version.
        let main = branch_service.find_latest("MAIN").await.unwrap();
        let visible = visible_concepts(&store, &helper, &main).await;
        assert!(visible[0].component.active);
    }

    #[tokio::test]
    async fn open_commit_rows_need_the_open_commit_view() {
        let (store, branch_service, helper) = setup().await;
        let mut commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("test"))
            .await
            .unwrap();
        store.save_batch(&mut commit, vec![concept("100000", true)]).await.unwrap();

        let main = branch_service.find_latest("MAIN").await.unwrap();
        assert!(visible_concepts(&store, &helper, &main).await.is_empty());

        let including = helper.branch_criteria_including_open_commit(&commit).await.unwrap();
        let hits = store
            .search::<Concept>(
                &BoolQuery::new()
                    .must(including.entity_branch_criteria(Concept::DOC_TYPE))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();
    }

    #[tokio::test]
    async fn second_open_commit_fails_while_lock_is_held() {
        let (_store, branch_service, _) = setup().await;
        let commit = branch_service
            .open_commit("MAIN", &branch_lock_metadata("first"))
            .await
            .unwrap();
        assert!(branch_service
            .open_commit("MAIN", &branch_lock_metadata("second"))
            .await
            .is_err());
        branch_service.close_commit(commit).await.unwrap();
    }

    #[tokio::test]
    async fn unpromoted_changes_view_only_shows_branch_rows() {
        let (store, branch_service, helper) = setup().await;
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100000", true)]).await;
        branch_service.create("MAIN/project").await.unwrap();
        commit_concepts(&store, &branch_service, "MAIN/project", vec![concept("100001", true)]).await;

        let project = branch_service.find_latest("MAIN/project").await.unwrap();
        let criteria = helper.branch_criteria_unpromoted_changes(&project);
        let changed = store
            .search::<Concept>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].concept_id, "100001");
    }

    #[tokio::test]
    async fn changes_and_deletions_view_includes_replaced_parent_rows() {
        let (store, branch_service, helper) = setup().await;
        commit_concepts(&store, &branch_service, "MAIN", vec![concept("100000", true)]).await;
        branch_service.create("MAIN/project").await.unwrap();

        let mut commit = branch_service
            .open_commit("MAIN/project", &branch_lock_metadata("delete"))
            .await
            .unwrap();
        store.delete_component::<Concept>(&mut commit, "100000").await.unwrap();
        commit.mark_successful();
        branch_service.close_commit(commit).await.unwrap();

        let project = branch_service.find_latest("MAIN/project").await.unwrap();
        let criteria = helper.branch_criteria_unpromoted_changes_and_deletions(&project);
        let rows = store
            .search::<Concept>(
                &BoolQuery::new()
                    .must(criteria.entity_branch_criteria(Concept::DOC_TYPE))
                    .must(term(Concept::FIELD_CONCEPT_ID, "100000"))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
