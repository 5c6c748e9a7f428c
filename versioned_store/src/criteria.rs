// versioned_store/src/criteria.rs

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use crate::branch::Branch;
use crate::commit::Commit;
use crate::query::{not_exists, range_gt, range_lte, term, terms, BoolQuery, Query};

pub const FIELD_PATH: &str = "path";
pub const FIELD_START: &str = "start";
pub const FIELD_END: &str = "end";
pub const FIELD_INTERNAL_ID: &str = "internalId";

/// One visibility window onto a single branch path.
#[derive(Debug, Clone)]
struct PathClause {
    path: String,
    /// Rows with `start <= start_lte` are visible.
    start_lte: Option<i64>,
    /// Rows with exactly this `start` are additionally visible (open commit).
    start_eq: Option<i64>,
    /// When set, rows must have `start` strictly greater (unpromoted-change
    /// windows after a promotion).
    start_gt: Option<i64>,
    /// Rows ended at exactly this timepoint stay visible (the snapshot a
    /// commit started from).
    end_eq: Option<i64>,
}

impl PathClause {
    fn to_query(&self) -> Query {
        let mut clause = BoolQuery::new().must(term(FIELD_PATH, self.path.as_str()));
        if self.start_lte.is_some() || self.start_eq.is_some() {
            let mut start = BoolQuery::new();
            if let Some(cap) = self.start_lte {
                start = start.should(range_lte(FIELD_START, cap));
            }
            if let Some(timepoint) = self.start_eq {
                start = start.should(term(FIELD_START, timepoint));
            }
            clause = clause.must(start.build());
        }
        if let Some(floor) = self.start_gt {
            clause = clause.must(range_gt(FIELD_START, floor));
        }
        let mut end = BoolQuery::new().should(not_exists(FIELD_END));
        if let Some(timepoint) = self.end_eq {
            end = end.should(term(FIELD_END, timepoint));
        }
        clause.must(end.build()).build()
    }
}

/// A predicate selecting the component versions visible in one particular
/// view of a branch. Translates into a plain query node per document type.
#[derive(Debug, Clone)]
pub struct BranchCriteria {
    branch_path: String,
    clauses: Vec<PathClause>,
    /// Superseded ancestor rows hidden from this view, per document type.
    excluded_internal_ids: HashMap<String, HashSet<Uuid>>,
    /// Rows visible regardless of the clauses (the deleted-or-replaced rows
    /// of the changes-and-deletions view), per document type.
    included_internal_ids: HashMap<String, HashSet<Uuid>>,
}

impl BranchCriteria {
    pub fn branch_path(&self) -> &str {
        &self.branch_path
    }

    /// The query restricting a search to this view, for one document type.
    pub fn entity_branch_criteria(&self, doc_type: &str) -> Query {
        let mut visible = BoolQuery::new();
        let mut path_clauses = BoolQuery::new();
        for clause in &self.clauses {
            path_clauses = path_clauses.should(clause.to_query());
        }
        visible = visible.must(path_clauses.build());
        if let Some(excluded) = self.excluded_internal_ids.get(doc_type) {
            if !excluded.is_empty() {
                visible = visible.must_not(terms(
                    FIELD_INTERNAL_ID,
                    excluded.iter().map(|id| Value::from(id.to_string())),
                ));
            }
        }
        let visible = visible.build();
        match self.included_internal_ids.get(doc_type) {
            Some(included) if !included.is_empty() => BoolQuery::new()
                .should(visible)
                .should(terms(
                    FIELD_INTERNAL_ID,
                    included.iter().map(|id| Value::from(id.to_string())),
                ))
                .build(),
            _ => visible,
        }
    }
}

/// Builds [`BranchCriteria`] views. The branch chain (the branch and its
/// ancestors, nearest first, each paired with the timestamp cap of the view
/// onto it) is supplied by the branch service.
pub struct CriteriaBuilder;

impl CriteriaBuilder {
    /// Latest visible version of each component on the branch: rows on the
    /// branch itself up to its head, rows on each ancestor alive at the
    /// branch's base view of it, minus versions replaced below.
    pub fn for_branch(chain: &[(Branch, i64)]) -> BranchCriteria {
        let (branch, _) = &chain[0];
        let mut clauses = Vec::new();
        let mut excluded: HashMap<String, HashSet<Uuid>> = HashMap::new();
        for (index, (chain_branch, cap)) in chain.iter().enumerate() {
            clauses.push(PathClause {
                path: chain_branch.path.clone(),
                start_lte: Some(*cap),
                start_eq: None,
                start_gt: None,
                end_eq: None,
            });
            // Replacements recorded on this level hide ancestor rows, but
            // only those performed within the view window onto this level.
            if index < chain.len() - 1 {
                for (doc_type, replaced) in &chain_branch.versions_replaced {
                    let entry = excluded.entry(doc_type.clone()).or_default();
                    for (internal_id, replaced_at) in replaced {
                        if *replaced_at <= *cap {
                            entry.insert(*internal_id);
                        }
                    }
                }
            }
        }
        BranchCriteria {
            branch_path: branch.path.clone(),
            clauses,
            excluded_internal_ids: excluded,
            included_internal_ids: HashMap::new(),
        }
    }

    /// As [`for_branch`], plus rows written by the open commit and minus the
    /// ancestor rows the commit has already superseded.
    pub fn including_open_commit(chain: &[(Branch, i64)], commit: &Commit) -> BranchCriteria {
        let mut criteria = Self::for_branch(chain);
        if let Some(own) = criteria.clauses.first_mut() {
            own.start_eq = Some(commit.timepoint());
        }
        for (doc_type, replaced) in &commit.versions_replaced_added {
            criteria
                .excluded_internal_ids
                .entry(doc_type.clone())
                .or_default()
                .extend(replaced.keys().copied());
        }
        criteria
    }

    /// The snapshot the open commit started from: the plain branch view,
    /// with rows the commit has end-dated still visible.
    pub fn before_open_commit(chain: &[(Branch, i64)], commit: &Commit) -> BranchCriteria {
        let mut criteria = Self::for_branch(chain);
        if let Some(own) = criteria.clauses.first_mut() {
            own.end_eq = Some(commit.timepoint());
        }
        criteria
    }

    /// Components changed on the branch and not yet promoted to its parent.
    pub fn unpromoted_changes(branch: &Branch) -> BranchCriteria {
        BranchCriteria {
            branch_path: branch.path.clone(),
            clauses: vec![PathClause {
                path: branch.path.clone(),
                start_lte: None,
                start_eq: None,
                start_gt: branch.last_promotion_timestamp,
                end_eq: None,
            }],
            excluded_internal_ids: HashMap::new(),
            included_internal_ids: HashMap::new(),
        }
    }

    /// As [`unpromoted_changes`], plus the superseded or deleted ancestor
    /// rows recorded on the branch (tombstone view).
    pub fn unpromoted_changes_and_deletions(branch: &Branch) -> BranchCriteria {
        let mut criteria = Self::unpromoted_changes(branch);
        for (doc_type, replaced) in &branch.versions_replaced {
            criteria
                .included_internal_ids
                .entry(doc_type.clone())
                .or_default()
                .extend(replaced.keys().copied());
        }
        criteria
    }

    /// Only the rows written by the open commit itself.
    pub fn changes_within_open_commit(commit: &Commit) -> BranchCriteria {
        BranchCriteria {
            branch_path: commit.branch().path.clone(),
            clauses: vec![PathClause {
                path: commit.branch().path.clone(),
                start_lte: None,
                start_eq: Some(commit.timepoint()),
                start_gt: None,
                end_eq: None,
            }],
            excluded_internal_ids: HashMap::new(),
            included_internal_ids: HashMap::new(),
        }
    }
}
