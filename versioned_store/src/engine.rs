// versioned_store/src/engine.rs

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use models::errors::{ServiceError, ServiceResult};
use models::Entity;

use crate::branch::Branch;
use crate::commit::Commit;
use crate::criteria::CriteriaBuilder;
use crate::path_util;
use crate::query::Query;

/// Page size used by every full scan so the store streams rather than
/// materialises.
pub const LARGE_PAGE: usize = 10_000;

/// One stored version of one document.
#[derive(Debug, Clone)]
struct DocRow {
    id: String,
    internal_id: Uuid,
    path: String,
    start: i64,
    end: Option<i64>,
    source: Value,
}

impl DocRow {
    fn set_end(&mut self, end: Option<i64>) {
        self.end = end;
        match end {
            Some(timepoint) => {
                self.source["end"] = Value::from(timepoint);
            }
            None => {
                if let Some(object) = self.source.as_object_mut() {
                    object.remove("end");
                }
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    docs: HashMap<String, Vec<DocRow>>,
    branches: HashMap<String, Branch>,
    locks: HashMap<String, String>,
}

/// The versioned, predicate-indexed document store. Cheap to clone; all
/// clones share state.
#[derive(Clone, Default)]
pub struct TerminologyStore {
    state: Arc<RwLock<StoreState>>,
}

/// A lazy hit stream over a search snapshot; the underlying cursor is
/// released when the stream is dropped, on every exit path.
pub struct SearchStream<T> {
    hits: std::vec::IntoIter<T>,
    page: Vec<T>,
    page_size: usize,
}

impl<T> SearchStream<T> {
    fn new(hits: Vec<T>, page_size: usize) -> Self {
        SearchStream {
            hits: hits.into_iter(),
            page: Vec::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn next_hit(&mut self) -> Option<T> {
        if self.page.is_empty() {
            // Pull the next page from the snapshot.
            self.page = (&mut self.hits).take(self.page_size).collect();
            self.page.reverse();
        }
        self.page.pop()
    }
}

impl TerminologyStore {
    pub fn new() -> Self {
        TerminologyStore::default()
    }

    // --- Branch registry (shared with the branch service) ---

    pub(crate) async fn put_branch(&self, branch: Branch) {
        let mut state = self.state.write().await;
        state.branches.insert(branch.path.clone(), branch);
    }

    pub(crate) async fn get_branch(&self, path: &str) -> Option<Branch> {
        let state = self.state.read().await;
        state.branches.get(path).cloned()
    }

    pub(crate) async fn lock_branch(&self, path: &str, lock_metadata: &str) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.locks.contains_key(path) {
            return Err(ServiceError::LockContention(path.to_string()));
        }
        state.locks.insert(path.to_string(), lock_metadata.to_string());
        Ok(())
    }

    pub(crate) async fn unlock_branch(&self, path: &str) {
        let mut state = self.state.write().await;
        state.locks.remove(path);
    }

    /// The branch plus its ancestors, nearest first, each paired with the
    /// timestamp cap of the view onto it.
    pub(crate) async fn branch_chain(&self, branch: &Branch) -> ServiceResult<Vec<(Branch, i64)>> {
        let state = self.state.read().await;
        let mut chain = vec![(branch.clone(), branch.head_timestamp)];
        let mut cap = branch.base_timestamp;
        for ancestor_path in path_util::ancestor_paths(&branch.path) {
            let ancestor = state
                .branches
                .get(&ancestor_path)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(format!("Branch {}", ancestor_path)))?;
            let ancestor_base = ancestor.base_timestamp;
            chain.push((ancestor, cap));
            cap = cap.min(ancestor_base);
        }
        Ok(chain)
    }

    // --- Search ---

    /// Raw document sources matching a predicate query.
    pub async fn search_sources(&self, doc_type: &str, query: &Query) -> Vec<Value> {
        self.matching_sources(doc_type, query).await
    }

    async fn matching_sources(&self, doc_type: &str, query: &Query) -> Vec<Value> {
        let state = self.state.read().await;
        state
            .docs
            .get(doc_type)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.matches(&row.source))
                    .map(|row| row.source.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stream typed hits for a predicate query, paging under the hood.
    pub async fn search_stream<T: Entity>(
        &self,
        query: &Query,
        page_size: usize,
    ) -> ServiceResult<SearchStream<T>> {
        let sources = self.matching_sources(T::DOC_TYPE, query).await;
        let mut hits = Vec::with_capacity(sources.len());
        for source in sources {
            hits.push(serde_json::from_value(source).map_err(|e| ServiceError::Store(e.to_string()))?);
        }
        Ok(SearchStream::new(hits, page_size))
    }

    /// Materialise every typed hit for a query.
    pub async fn search<T: Entity>(&self, query: &Query) -> ServiceResult<Vec<T>> {
        let mut results = Vec::new();
        let mut stream = self.search_stream::<T>(query, LARGE_PAGE).await?;
        while let Some(hit) = stream.next_hit() {
            results.push(hit);
        }
        Ok(results)
    }

    /// Source-field projection: the value of one field from each hit.
    pub async fn search_field(&self, doc_type: &str, query: &Query, field: &str) -> Vec<Value> {
        self.matching_sources(doc_type, query)
            .await
            .into_iter()
            .filter_map(|source| source.get(field).cloned())
            .collect()
    }

    // --- Versioned writes ---

    /// Persist a batch of components into the open commit. Rows already
    /// written by the same commit are rewritten in place, rows from earlier
    /// commits on the same branch are end-dated, and visible ancestor rows
    /// are recorded as replaced on the commit.
    pub async fn save_batch<T: Entity>(&self, commit: &mut Commit, mut entities: Vec<T>) -> ServiceResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let chain = self.branch_chain(commit.branch()).await?;
        let criteria = CriteriaBuilder::including_open_commit(&chain, commit);
        let visibility = criteria.entity_branch_criteria(T::DOC_TYPE);
        let timepoint = commit.timepoint();
        let branch_path = commit.branch().path.clone();

        let mut state = self.state.write().await;
        let rows = state.docs.entry(T::DOC_TYPE.to_string()).or_default();
        for entity in entities.drain(..) {
            let id = entity.id();
            // Prefer the commit's own row, then the branch's current row;
            // an ancestor row only counts when nothing closer matches.
            let existing = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.id == id && visibility.matches(&row.source))
                .max_by_key(|(_, row)| {
                    if row.path == branch_path && row.start == timepoint {
                        2
                    } else if row.path == branch_path {
                        1
                    } else {
                        0
                    }
                })
                .map(|(index, _)| index);
            let mut entity = entity;
            match existing {
                Some(index) if rows[index].path == branch_path && rows[index].start == timepoint => {
                    // Second write of the same id within this commit:
                    // rewrite the row rather than appending a version.
                    let internal_id = rows[index].internal_id;
                    stamp_version(&mut entity, internal_id, &branch_path, timepoint);
                    rows[index].source = serde_json::to_value(&entity)?;
                }
                Some(index) if rows[index].path == branch_path => {
                    rows[index].set_end(Some(timepoint));
                    push_row(rows, entity, &branch_path, timepoint)?;
                }
                Some(index) => {
                    let replaced = rows[index].internal_id;
                    commit.record_version_replaced(T::DOC_TYPE, replaced);
                    push_row(rows, entity, &branch_path, timepoint)?;
                }
                None => {
                    push_row(rows, entity, &branch_path, timepoint)?;
                }
            }
        }
        Ok(())
    }

    /// Version-control deletion: end-date or supersede the current version
    /// without writing a replacement.
    pub async fn delete_component<T: Entity>(&self, commit: &mut Commit, id: &str) -> ServiceResult<()> {
        let chain = self.branch_chain(commit.branch()).await?;
        let criteria = CriteriaBuilder::including_open_commit(&chain, commit);
        let visibility = criteria.entity_branch_criteria(T::DOC_TYPE);
        let timepoint = commit.timepoint();
        let branch_path = commit.branch().path.clone();

        let mut state = self.state.write().await;
        let rows = state.docs.entry(T::DOC_TYPE.to_string()).or_default();
        if let Some(index) = rows
            .iter()
            .position(|row| row.id == id && visibility.matches(&row.source))
        {
            if rows[index].path == branch_path {
                if rows[index].start == timepoint {
                    rows.remove(index);
                } else {
                    rows[index].set_end(Some(timepoint));
                    let replaced = rows[index].internal_id;
                    commit.record_version_replaced(T::DOC_TYPE, replaced);
                }
            } else {
                let replaced = rows[index].internal_id;
                commit.record_version_replaced(T::DOC_TYPE, replaced);
            }
        }
        Ok(())
    }

    /// Narrow scripted-update primitive: rewrite additional fields of one
    /// stored reference-set member document in place.
    pub async fn rewrite_additional_fields(
        &self,
        doc_type: &str,
        internal_id: Uuid,
        fields: &std::collections::BTreeMap<String, String>,
    ) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        let rows = state
            .docs
            .get_mut(doc_type)
            .ok_or_else(|| ServiceError::NotFound(format!("Document collection {}", doc_type)))?;
        let row = rows
            .iter_mut()
            .find(|row| row.internal_id == internal_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Document {}", internal_id)))?;
        let additional = row.source["additionalFields"]
            .as_object_mut()
            .ok_or_else(|| ServiceError::Store(format!("Document {} has no additional fields", internal_id)))?;
        for (name, value) in fields {
            additional.insert(name.clone(), Value::from(value.clone()));
        }
        Ok(())
    }

    /// Make pending writes visible to searches. The in-memory engine is
    /// always consistent, so this only marks the write barrier in the logs.
    pub async fn refresh(&self, doc_type: &str) {
        debug!("Refreshed index for {}", doc_type);
    }

    // --- Commit lifecycle plumbing ---

    pub(crate) async fn finalize_commit(&self, commit: &mut Commit) {
        let timepoint = commit.timepoint();
        let mut branch = commit.branch().clone();
        branch.head_timestamp = timepoint;
        for (doc_type, replaced) in commit.versions_replaced_added.drain() {
            branch.versions_replaced.entry(doc_type).or_default().extend(replaced);
        }
        let mut state = self.state.write().await;
        state.branches.insert(branch.path.clone(), branch);
    }

    pub(crate) async fn rollback_commit(&self, commit: &mut Commit) {
        let timepoint = commit.timepoint();
        let path = commit.branch().path.clone();
        let mut state = self.state.write().await;
        for rows in state.docs.values_mut() {
            rows.retain(|row| !(row.path == path && row.start == timepoint));
            for row in rows.iter_mut() {
                if row.path == path && row.end == Some(timepoint) {
                    row.set_end(None);
                }
            }
        }
        commit.versions_replaced_added.clear();
        info!("Rolled back commit on {} at {}", path, timepoint);
    }

    /// Count every stored version of a component id on a branch path.
    /// Operator/test helper for the one-row-per-commit invariant.
    pub async fn version_count(&self, doc_type: &str, path: &str, id: &str) -> usize {
        let state = self.state.read().await;
        state
            .docs
            .get(doc_type)
            .map(|rows| rows.iter().filter(|row| row.path == path && row.id == id).count())
            .unwrap_or(0)
    }
}

fn stamp_version<T: Entity>(entity: &mut T, internal_id: Uuid, path: &str, timepoint: i64) {
    let version = entity.version_mut();
    version.internal_id = Some(internal_id);
    version.path = Some(path.to_string());
    version.start = Some(timepoint);
    version.end = None;
}

fn push_row<T: Entity>(rows: &mut Vec<DocRow>, mut entity: T, path: &str, timepoint: i64) -> ServiceResult<()> {
    let internal_id = Uuid::new_v4();
    stamp_version(&mut entity, internal_id, path, timepoint);
    rows.push(DocRow {
        id: entity.id(),
        internal_id,
        path: path.to_string(),
        start: timepoint,
        end: None,
        source: serde_json::to_value(&entity)?,
    });
    Ok(())
}
