// versioned_store/src/commit.rs

use std::collections::HashMap;

use uuid::Uuid;

use crate::branch::Branch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitType {
    Content,
    Rebase,
    Promotion,
}

/// An open unit of atomic mutation on one branch. Every row written while
/// the commit is open carries `start == timepoint`; closing the commit
/// without marking it successful rolls all of them back.
#[derive(Debug)]
pub struct Commit {
    branch: Branch,
    timepoint: i64,
    commit_type: CommitType,
    successful: bool,
    /// Ancestor rows superseded by this commit, applied to the branch only
    /// on successful completion.
    pub(crate) versions_replaced_added: HashMap<String, HashMap<Uuid, i64>>,
}

impl Commit {
    pub(crate) fn new(branch: Branch, timepoint: i64, commit_type: CommitType) -> Self {
        Commit {
            branch,
            timepoint,
            commit_type,
            successful: false,
            versions_replaced_added: HashMap::new(),
        }
    }

    pub fn branch(&self) -> &Branch {
        &self.branch
    }

    /// Listeners may mutate the in-flight branch snapshot (metadata); the
    /// snapshot is persisted when the commit completes.
    pub fn branch_mut(&mut self) -> &mut Branch {
        &mut self.branch
    }

    pub fn timepoint(&self) -> i64 {
        self.timepoint
    }

    pub fn commit_type(&self) -> CommitType {
        self.commit_type
    }

    pub fn mark_successful(&mut self) {
        self.successful = true;
    }

    pub fn is_successful(&self) -> bool {
        self.successful
    }

    pub(crate) fn record_version_replaced(&mut self, doc_type: &str, internal_id: Uuid) {
        self.versions_replaced_added
            .entry(doc_type.to_string())
            .or_default()
            .insert(internal_id, self.timepoint);
    }

    pub(crate) fn pending_replaced_for_type(&self, doc_type: &str) -> Vec<Uuid> {
        self.versions_replaced_added
            .get(doc_type)
            .map(|replaced| replaced.keys().copied().collect())
            .unwrap_or_default()
    }
}
