// rf2_import/src/service.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info};
use tokio::sync::RwLock;
use uuid::Uuid;

use concept_service::{
    CodeSystemService, ConceptService, IdentifierService, MostRecentEffectiveTimeFinder,
    ReferenceSetMemberService,
};
use models::errors::{ServiceError, ServiceResult};
use versioned_store::branch::{
    AUTHOR_FLAGS_METADATA_KEY, BATCH_CHANGE_METADATA_KEY, IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY,
    IMPORT_TYPE_METADATA_KEY, INTERNAL_METADATA_KEY,
};
use versioned_store::{path_util, BranchService, Commit, TerminologyStore, VersionControlHelper};

use crate::component_factory::ImportComponentFactory;
use crate::full_factory::FullImportComponentFactory;
use crate::job::{ImportJob, ImportStatus, Rf2ImportConfiguration, Rf2Type};
use crate::reader::{LoadingProfile, ReleaseImporter, Rf2Archive};

/// Drives RF2 import jobs end-to-end: job registry, branch metadata
/// bracketing, factory construction per import type, rollback of an
/// incomplete commit on failure and code-system versioning on success.
#[derive(Clone)]
pub struct ImportService {
    jobs: Arc<RwLock<HashMap<String, ImportJob>>>,
    store: TerminologyStore,
    branch_service: BranchService,
    version_control: VersionControlHelper,
    concept_service: ConceptService,
    member_service: ReferenceSetMemberService,
    identifier_service: IdentifierService,
    code_system_service: CodeSystemService,
    effective_time_finder: MostRecentEffectiveTimeFinder,
}

impl ImportService {
    pub fn new(
        store: TerminologyStore,
        branch_service: BranchService,
        code_system_service: CodeSystemService,
    ) -> Self {
        let version_control = VersionControlHelper::new(store.clone());
        ImportService {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            concept_service: ConceptService::new(store.clone()),
            member_service: ReferenceSetMemberService::new(store.clone()),
            identifier_service: IdentifierService::new(store.clone()),
            effective_time_finder: MostRecentEffectiveTimeFinder::new(store.clone(), version_control.clone()),
            version_control,
            store,
            branch_service,
            code_system_service,
        }
    }

    /// Create an import job ready for an archive. Validates the branch and
    /// the configuration; the job waits for its file.
    pub async fn create_job(&self, config: Rf2ImportConfiguration) -> ServiceResult<String> {
        let branch_path = config.branch_path.clone();
        if !self.branch_service.exists(&branch_path).await {
            return Err(ServiceError::Validation(format!("Branch {} does not exist.", branch_path)));
        }

        // The -1 sentinel disables the patcher outright and is allowed on
        // any import type; a real patch release must be a delta.
        if let Some(patch_release_version) = config.patch_release_version {
            if patch_release_version != -1 && config.rf2_type != Rf2Type::Delta {
                return Err(ServiceError::Validation(
                    "Patch release imports must use the DELTA import type.".to_string(),
                ));
            }
        }

        if config.rf2_type == Rf2Type::Full {
            let criteria = self.version_control.branch_criteria_at_path(&branch_path).await?;
            if branch_path != path_util::MAIN || self.concept_service.has_existing_content(&criteria).await? {
                return Err(ServiceError::Validation(
                    "FULL import is only implemented for the MAIN branch and when there is no existing content."
                        .to_string(),
                ));
            }
        }

        if config.create_code_system_version
            && self.code_system_service.find_by_branch_path(&branch_path).await.is_none()
        {
            return Err(ServiceError::Validation(format!(
                "The createCodeSystemVersion option has been used but there is no code system on branch path {}.",
                branch_path
            )));
        }

        let id = Uuid::new_v4().to_string();
        self.jobs.write().await.insert(id.clone(), ImportJob::new(config));
        Ok(id)
    }

    /// Run an import synchronously with the supplied archive. Returns the
    /// max effectiveTime observed, the release version created.
    pub async fn import_archive(&self, import_id: &str, archive: &Rf2Archive) -> ServiceResult<Option<i32>> {
        let job = self.get_import_job_or_throw(import_id).await?;
        if job.status != ImportStatus::WaitingForFile {
            return Err(ServiceError::RuntimeState(
                "Import job must be in state WAITING_FOR_FILE".to_string(),
            ));
        }
        let config = job.config;
        let branch_path = config.branch_path.clone();
        self.set_import_metadata(&config).await?;
        self.set_job_status(import_id, ImportStatus::Running).await;
        let started = Instant::now();
        info!(
            "Starting RF2 {}{} import on branch {}. ID {}",
            config.rf2_type.name(),
            config
                .patch_release_version
                .map(|version| format!(" RELEASE PATCH on effectiveTime {}", version))
                .unwrap_or_default(),
            branch_path,
            import_id
        );

        let outcome = self.run_import(&config, archive).await;
        self.clear_import_metadata(&branch_path).await?;
        match outcome {
            Ok(max_effective_time) => {
                if config.create_code_system_version && config.rf2_type != Rf2Type::Full {
                    if let Some(effective_time) = max_effective_time {
                        self.code_system_service
                            .create_version_if_code_system_found_on_path(
                                &branch_path,
                                effective_time,
                                config.internal_release,
                            )
                            .await;
                    }
                }
                self.set_job_status(import_id, ImportStatus::Completed).await;
                info!(
                    "Completed RF2 {} import on branch {} in {} seconds. ID {}",
                    config.rf2_type.name(),
                    branch_path,
                    started.elapsed().as_secs(),
                    import_id
                );
                Ok(max_effective_time)
            }
            Err(e) => {
                error!(
                    "Failed RF2 {} import on branch {}. ID {}: {}",
                    config.rf2_type.name(),
                    branch_path,
                    import_id,
                    e
                );
                self.set_job_status(import_id, ImportStatus::Failed).await;
                Err(e)
            }
        }
    }

    /// Run an import on a background worker. The worker swallows the error
    /// after the job status has been set to FAILED; callers poll the job.
    pub async fn import_archive_async(&self, import_id: String, archive: Rf2Archive) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.import_archive(&import_id, &archive).await {
                // Already logged and reflected in the job status.
                let _ = e;
            }
        });
    }

    /// Create a job and immediately start importing the given local
    /// archive, skipping the waiting-for-file state.
    pub async fn start_local_file_import(
        &self,
        config: Rf2ImportConfiguration,
        archive: Rf2Archive,
    ) -> ServiceResult<String> {
        let import_id = self.create_job(config).await?;
        self.import_archive_async(import_id.clone(), archive).await;
        Ok(import_id)
    }

    pub async fn get_import_job_or_throw(&self, import_id: &str) -> ServiceResult<ImportJob> {
        self.jobs
            .read()
            .await
            .get(import_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("Import job".to_string()))
    }

    /// Registry lifecycle sweep: drop terminal jobs older than the TTL.
    pub async fn remove_completed_jobs_older_than(&self, max_age_millis: i64) {
        let now = Utc::now().timestamp_millis();
        self.jobs.write().await.retain(|_, job| match job.finished_timestamp {
            Some(finished) => now - finished < max_age_millis,
            None => true,
        });
    }

    async fn run_import(&self, config: &Rf2ImportConfiguration, archive: &Rf2Archive) -> ServiceResult<Option<i32>> {
        let importer = ReleaseImporter::new();
        let profile = LoadingProfile::complete().with_module_ids(config.module_ids.iter().cloned());
        match config.rf2_type {
            Rf2Type::Delta => {
                // Without a new code system version the release fields are
                // copied from the existing components.
                let mut factory = self.import_component_factory(config);
                match importer.load_delta_release_files(archive, &profile, &mut factory).await {
                    Ok(()) => Ok(factory.max_effective_time()),
                    Err(e) => {
                        self.rollback_incomplete_commit(factory.take_commit()).await;
                        Err(e)
                    }
                }
            }
            Rf2Type::Snapshot => {
                let mut factory = self.import_component_factory(config);
                let mut profile = profile;
                // The patch sentinel bypasses every staleness filter.
                if config.patch_release_version.is_none() {
                    factory.use_module_effective_time_filter(true);
                    let filter = self
                        .effective_time_finder
                        .get_effective_time_by_module_id(&config.branch_path)
                        .await?;
                    if !filter.is_empty() {
                        info!(
                            "Fetched latest effectiveTime by module on path {} {:?}",
                            config.branch_path, filter
                        );
                    }
                    profile = profile.with_module_effective_time_filter(filter);
                }
                match importer.load_snapshot_release_files(archive, &profile, &mut factory).await {
                    Ok(()) => Ok(factory.max_effective_time()),
                    Err(e) => {
                        self.rollback_incomplete_commit(factory.take_commit()).await;
                        Err(e)
                    }
                }
            }
            Rf2Type::Full => {
                let inner = ImportComponentFactory::new(
                    self.store.clone(),
                    self.branch_service.clone(),
                    self.version_control.clone(),
                    self.concept_service.clone(),
                    self.member_service.clone(),
                    self.identifier_service.clone(),
                    &config.branch_path,
                    None,
                    false,
                    false,
                );
                let mut factory =
                    FullImportComponentFactory::new(inner, self.code_system_service.clone(), &config.branch_path);
                match importer.load_full_release_files(archive, &profile, &mut factory).await {
                    Ok(()) => Ok(None),
                    Err(e) => {
                        self.rollback_incomplete_commit(factory.take_commit()).await;
                        Err(e)
                    }
                }
            }
        }
    }

    fn import_component_factory(&self, config: &Rf2ImportConfiguration) -> ImportComponentFactory {
        ImportComponentFactory::new(
            self.store.clone(),
            self.branch_service.clone(),
            self.version_control.clone(),
            self.concept_service.clone(),
            self.member_service.clone(),
            self.identifier_service.clone(),
            &config.branch_path,
            config.patch_release_version,
            !config.create_code_system_version,
            config.clear_effective_times,
        )
    }

    async fn rollback_incomplete_commit(&self, commit: Option<Commit>) {
        if let Some(commit) = commit {
            info!(
                "Triggering rollback of failed import commit on {} at {}",
                commit.branch().path,
                commit.timepoint()
            );
            // Closing the commit without marking as successful causes
            // commit rollback.
            let _ = self.branch_service.close_commit(commit).await;
        }
    }

    async fn set_job_status(&self, import_id: &str, status: ImportStatus) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(import_id) {
            job.status = status;
            if matches!(status, ImportStatus::Completed | ImportStatus::Failed) {
                job.finished_timestamp = Some(Utc::now().timestamp_millis());
            }
        }
    }

    /// Import metadata is saved to the store rather than only existing on
    /// the commit: imports span multiple commits when importing a FULL
    /// type or creating a code system version.
    async fn set_import_metadata(&self, config: &Rf2ImportConfiguration) -> ServiceResult<()> {
        let branch = self.branch_service.find_latest(&config.branch_path).await?;
        let mut metadata = branch.metadata.clone();
        let internal = metadata.map_or_create(INTERNAL_METADATA_KEY);
        internal.insert(IMPORT_TYPE_METADATA_KEY.to_string(), config.rf2_type.name().to_string());
        if config.rf2_type == Rf2Type::Full || config.create_code_system_version {
            internal.insert(IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY.to_string(), "true".to_string());
        }
        if self.code_system_service.find_by_branch_path(&config.branch_path).await.is_none() {
            metadata
                .map_or_create(AUTHOR_FLAGS_METADATA_KEY)
                .insert(BATCH_CHANGE_METADATA_KEY.to_string(), "true".to_string());
        }
        self.branch_service.update_metadata(&config.branch_path, metadata).await
    }

    async fn clear_import_metadata(&self, branch_path: &str) -> ServiceResult<()> {
        let branch = self.branch_service.find_latest(branch_path).await?;
        let mut metadata = branch.metadata.clone();
        let internal = metadata.map_or_create(INTERNAL_METADATA_KEY);
        internal.remove(IMPORT_TYPE_METADATA_KEY);
        internal.remove(IMPORTING_CODE_SYSTEM_VERSION_METADATA_KEY);
        self.branch_service.update_metadata(branch_path, metadata).await
    }
}
