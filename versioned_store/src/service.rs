// versioned_store/src/service.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use tokio::sync::RwLock;

use models::errors::{ServiceError, ServiceResult};

use crate::branch::{Branch, Metadata};
use crate::commit::{Commit, CommitType};
use crate::criteria::{BranchCriteria, CriteriaBuilder};
use crate::engine::TerminologyStore;
use crate::path_util;

/// Hook run after a successful commit's writes have been staged but before
/// the branch head advances. An error rolls the commit back.
#[async_trait]
pub trait CommitListener: Send + Sync {
    async fn pre_commit_completion(&self, commit: &mut Commit) -> ServiceResult<()>;
}

/// Metadata recorded against the branch lock while a commit holds it.
pub fn branch_lock_metadata(description: &str) -> String {
    format!("{{\"context\":\"{}\"}}", description)
}

/// Branch tree operations and the commit lifecycle.
#[derive(Clone)]
pub struct BranchService {
    store: TerminologyStore,
    listeners: Arc<RwLock<Vec<Arc<dyn CommitListener>>>>,
}

impl BranchService {
    pub fn new(store: TerminologyStore) -> Self {
        BranchService {
            store,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &TerminologyStore {
        &self.store
    }

    pub async fn register_commit_listener(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Create a branch. Non-root paths branch off their parent's head.
    pub async fn create(&self, path: &str) -> ServiceResult<Branch> {
        if self.store.get_branch(path).await.is_some() {
            return Err(ServiceError::Validation(format!("Branch {} already exists", path)));
        }
        let branch = match path_util::parent_path(path) {
            None => {
                let now = Utc::now().timestamp_millis();
                Branch::new(path, now, now)
            }
            Some(parent_path) => {
                let parent = self
                    .store
                    .get_branch(parent_path)
                    .await
                    .ok_or_else(|| ServiceError::Validation(format!("Parent branch {} does not exist", parent_path)))?;
                Branch::new(path, parent.head_timestamp, parent.head_timestamp)
            }
        };
        self.store.put_branch(branch.clone()).await;
        info!("Created branch {}", path);
        Ok(branch)
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.store.get_branch(path).await.is_some()
    }

    pub async fn find_latest(&self, path: &str) -> ServiceResult<Branch> {
        self.store
            .get_branch(path)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("Branch {}", path)))
    }

    pub async fn find_branch_or_throw(&self, path: &str) -> ServiceResult<Branch> {
        self.find_latest(path).await
    }

    pub async fn update_metadata(&self, path: &str, metadata: Metadata) -> ServiceResult<()> {
        let mut branch = self.find_latest(path).await?;
        branch.metadata = metadata;
        self.store.put_branch(branch).await;
        Ok(())
    }

    /// Open a content commit. Fails immediately when the branch lock is
    /// already taken; there is no retry.
    pub async fn open_commit(&self, path: &str, lock_metadata: &str) -> ServiceResult<Commit> {
        self.open_commit_of_type(path, CommitType::Content, lock_metadata).await
    }

    pub async fn open_commit_of_type(
        &self,
        path: &str,
        commit_type: CommitType,
        lock_metadata: &str,
    ) -> ServiceResult<Commit> {
        let branch = self.find_latest(path).await?;
        self.store.lock_branch(path, lock_metadata).await?;
        let timepoint = Utc::now().timestamp_millis().max(branch.head_timestamp + 1);
        Ok(Commit::new(branch, timepoint, commit_type))
    }

    /// Complete the commit: run the listeners, then advance the branch head;
    /// or roll back every write tagged with the commit when it was not
    /// marked successful or a listener failed.
    pub async fn close_commit(&self, mut commit: Commit) -> ServiceResult<()> {
        let path = commit.branch().path.clone();
        if !commit.is_successful() {
            self.store.rollback_commit(&mut commit).await;
            self.store.unlock_branch(&path).await;
            return Ok(());
        }
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            if let Err(e) = listener.pre_commit_completion(&mut commit).await {
                warn!("Commit listener failed on {}, rolling back: {}", path, e);
                self.store.rollback_commit(&mut commit).await;
                self.store.unlock_branch(&path).await;
                return Err(e);
            }
        }
        self.store.finalize_commit(&mut commit).await;
        self.store.unlock_branch(&path).await;
        info!("Completed commit on {} at {}", path, commit.timepoint());
        Ok(())
    }
}

/// Builds branch-criteria views over the live branch registry.
#[derive(Clone)]
pub struct VersionControlHelper {
    store: TerminologyStore,
}

impl VersionControlHelper {
    pub fn new(store: TerminologyStore) -> Self {
        VersionControlHelper { store }
    }

    pub async fn branch_criteria(&self, branch: &Branch) -> ServiceResult<BranchCriteria> {
        let chain = self.store.branch_chain(branch).await?;
        Ok(CriteriaBuilder::for_branch(&chain))
    }

    pub async fn branch_criteria_at_path(&self, path: &str) -> ServiceResult<BranchCriteria> {
        let branch = self
            .store
            .get_branch(path)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("Branch {}", path)))?;
        self.branch_criteria(&branch).await
    }

    pub async fn branch_criteria_including_open_commit(&self, commit: &Commit) -> ServiceResult<BranchCriteria> {
        let chain = self.store.branch_chain(commit.branch()).await?;
        Ok(CriteriaBuilder::including_open_commit(&chain, commit))
    }

    pub async fn branch_criteria_before_open_commit(&self, commit: &Commit) -> ServiceResult<BranchCriteria> {
        let chain = self.store.branch_chain(commit.branch()).await?;
        Ok(CriteriaBuilder::before_open_commit(&chain, commit))
    }

    pub fn branch_criteria_unpromoted_changes(&self, branch: &Branch) -> BranchCriteria {
        CriteriaBuilder::unpromoted_changes(branch)
    }

    pub fn branch_criteria_unpromoted_changes_and_deletions(&self, branch: &Branch) -> BranchCriteria {
        CriteriaBuilder::unpromoted_changes_and_deletions(branch)
    }

    pub fn branch_criteria_changes_within_open_commit(&self, commit: &Commit) -> BranchCriteria {
        CriteriaBuilder::changes_within_open_commit(commit)
    }
}
