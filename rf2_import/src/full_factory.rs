// rf2_import/src/full_factory.rs

use async_trait::async_trait;
use log::info;

use concept_service::CodeSystemService;
use models::errors::ServiceResult;

use crate::component_factory::ImportComponentFactory;
use crate::reader::ComponentFactory;

/// Component factory for full imports. The archive carries every
/// historical version, so a commit is closed and reopened at each release
/// boundary: each published release lands atomically with its own
/// timestamp, and a code system version is recorded for it.
pub struct FullImportComponentFactory {
    inner: ImportComponentFactory,
    code_system_service: CodeSystemService,
    branch_path: String,
}

impl FullImportComponentFactory {
    pub fn new(inner: ImportComponentFactory, code_system_service: CodeSystemService, branch_path: &str) -> Self {
        FullImportComponentFactory {
            inner,
            code_system_service,
            branch_path: branch_path.to_string(),
        }
    }

    pub fn max_effective_time(&self) -> Option<i32> {
        self.inner.max_effective_time()
    }

    pub fn take_commit(&mut self) -> Option<versioned_store::Commit> {
        self.inner.take_commit()
    }
}

#[async_trait]
impl ComponentFactory for FullImportComponentFactory {
    async fn loading_components_starting(&mut self) -> ServiceResult<()> {
        // Commits are managed per release delta instead.
        Ok(())
    }

    async fn loading_components_completed(&mut self) -> ServiceResult<()> {
        if self.inner.has_open_commit() {
            self.inner.complete_import_commit().await?;
        }
        Ok(())
    }

    async fn loading_release_delta_starting(&mut self, effective_time: i32) -> ServiceResult<()> {
        info!("Loading release {} on {}", effective_time, self.branch_path);
        self.inner.open_import_commit().await
    }

    async fn loading_release_delta_finished(&mut self, effective_time: i32) -> ServiceResult<()> {
        self.inner.complete_import_commit().await?;
        if effective_time > 0 {
            self.code_system_service
                .create_version_if_code_system_found_on_path(&self.branch_path, effective_time, false)
                .await;
        }
        Ok(())
    }

    async fn new_concept_state(
        &mut self,
        concept_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        definition_status_id: &str,
    ) -> ServiceResult<()> {
        self.inner
            .new_concept_state(concept_id, effective_time, active, module_id, definition_status_id)
            .await
    }

    async fn new_relationship_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        destination_id: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> ServiceResult<()> {
        self.inner
            .new_relationship_state(
                id,
                effective_time,
                active,
                module_id,
                source_id,
                destination_id,
                relationship_group,
                type_id,
                characteristic_type_id,
                modifier_id,
            )
            .await
    }

    async fn new_concrete_relationship_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        value: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> ServiceResult<()> {
        self.inner
            .new_concrete_relationship_state(
                id,
                effective_time,
                active,
                module_id,
                source_id,
                value,
                relationship_group,
                type_id,
                characteristic_type_id,
                modifier_id,
            )
            .await
    }

    async fn new_description_state(
        &mut self,
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        concept_id: &str,
        language_code: &str,
        type_id: &str,
        term: &str,
        case_significance_id: &str,
    ) -> ServiceResult<()> {
        self.inner
            .new_description_state(
                id,
                effective_time,
                active,
                module_id,
                concept_id,
                language_code,
                type_id,
                term,
                case_significance_id,
            )
            .await
    }

    async fn new_identifier_state(
        &mut self,
        alternate_identifier: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> ServiceResult<()> {
        self.inner
            .new_identifier_state(
                alternate_identifier,
                effective_time,
                active,
                module_id,
                identifier_scheme_id,
                referenced_component_id,
            )
            .await
    }

    async fn new_reference_set_member_state(
        &mut self,
        field_names: &[String],
        id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        refset_id: &str,
        referenced_component_id: &str,
        other_values: &[String],
    ) -> ServiceResult<()> {
        self.inner
            .new_reference_set_member_state(
                field_names,
                id,
                effective_time,
                active,
                module_id,
                refset_id,
                referenced_component_id,
                other_values,
            )
            .await
    }
}
