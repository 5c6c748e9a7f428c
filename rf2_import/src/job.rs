// rf2_import/src/job.rs

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rf2Type {
    Delta,
    Snapshot,
    Full,
}

impl Rf2Type {
    pub fn name(&self) -> &'static str {
        match self {
            Rf2Type::Delta => "DELTA",
            Rf2Type::Snapshot => "SNAPSHOT",
            Rf2Type::Full => "FULL",
        }
    }
}

/// Configuration of one import job.
#[derive(Debug, Clone)]
pub struct Rf2ImportConfiguration {
    pub rf2_type: Rf2Type,
    pub branch_path: String,
    /// Import only these modules; empty means all.
    pub module_ids: HashSet<String>,
    pub create_code_system_version: bool,
    pub clear_effective_times: bool,
    /// A designated effectiveTime that may be overwritten by a re-import;
    /// `-1` disables the effective-time patcher entirely.
    pub patch_release_version: Option<i32>,
    /// Hide the created code system version from release listings.
    pub internal_release: bool,
}

impl Rf2ImportConfiguration {
    pub fn new(rf2_type: Rf2Type, branch_path: &str) -> Self {
        Rf2ImportConfiguration {
            rf2_type,
            branch_path: branch_path.to_string(),
            module_ids: HashSet::new(),
            create_code_system_version: false,
            clear_effective_times: false,
            patch_release_version: None,
            internal_release: false,
        }
    }

    pub fn with_create_code_system_version(mut self, create: bool) -> Self {
        self.create_code_system_version = create;
        self
    }

    pub fn with_clear_effective_times(mut self, clear: bool) -> Self {
        self.clear_effective_times = clear;
        self
    }

    pub fn with_patch_release_version(mut self, patch_release_version: Option<i32>) -> Self {
        self.patch_release_version = patch_release_version;
        self
    }

    pub fn with_module_ids<I: IntoIterator<Item = String>>(mut self, module_ids: I) -> Self {
        self.module_ids = module_ids.into_iter().collect();
        self
    }

    pub fn with_internal_release(mut self, internal_release: bool) -> Self {
        self.internal_release = internal_release;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    WaitingForFile,
    Running,
    Completed,
    Failed,
}

/// One import job held in the process-wide registry. Jobs have no
/// persistence; completed entries are swept by the registry's TTL cleanup.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub config: Rf2ImportConfiguration,
    pub status: ImportStatus,
    /// Epoch millis when the job reached a terminal status.
    pub finished_timestamp: Option<i64>,
}

impl ImportJob {
    pub fn new(config: Rf2ImportConfiguration) -> Self {
        ImportJob {
            config,
            status: ImportStatus::WaitingForFile,
            finished_timestamp: None,
        }
    }
}
