// concept_service/src/code_systems.rs

use std::sync::Arc;

use log::info;
use models::errors::{ServiceError, ServiceResult};
use models::{CodeSystem, CodeSystemVersion};
use tokio::sync::RwLock;
use versioned_store::path_util;

#[derive(Default)]
struct CodeSystemState {
    code_systems: Vec<CodeSystem>,
    versions: Vec<CodeSystemVersion>,
}

/// Registry of code systems and their published versions. Only the
/// branch-lookup role is needed by the core subsystems.
#[derive(Clone, Default)]
pub struct CodeSystemService {
    state: Arc<RwLock<CodeSystemState>>,
}

impl CodeSystemService {
    pub fn new() -> Self {
        CodeSystemService::default()
    }

    pub async fn create_code_system(&self, code_system: CodeSystem) -> ServiceResult<()> {
        let mut state = self.state.write().await;
        if state.code_systems.iter().any(|cs| cs.short_name == code_system.short_name) {
            return Err(ServiceError::Validation(format!(
                "Code system {} already exists",
                code_system.short_name
            )));
        }
        state.code_systems.push(code_system);
        Ok(())
    }

    pub async fn find_all(&self) -> Vec<CodeSystem> {
        self.state.read().await.code_systems.clone()
    }

    pub async fn find_by_branch_path(&self, branch_path: &str) -> Option<CodeSystem> {
        self.state
            .read()
            .await
            .code_systems
            .iter()
            .find(|cs| cs.branch_path == branch_path)
            .cloned()
    }

    /// The code system owning a branch: the one rooted at the branch itself
    /// or at its nearest ancestor.
    pub async fn find_closest_code_system_using_any_branch(&self, branch_path: &str) -> Option<CodeSystem> {
        if let Some(code_system) = self.find_by_branch_path(branch_path).await {
            return Some(code_system);
        }
        for ancestor in path_util::ancestor_paths(branch_path) {
            if let Some(code_system) = self.find_by_branch_path(&ancestor).await {
                return Some(code_system);
            }
        }
        None
    }

    /// Record a code system version for the branch's code system, when one
    /// exists. Internal releases stay hidden from the version listing.
    pub async fn create_version_if_code_system_found_on_path(
        &self,
        branch_path: &str,
        effective_date: i32,
        internal_release: bool,
    ) -> Option<CodeSystemVersion> {
        let code_system = self.find_by_branch_path(branch_path).await?;
        let version = CodeSystemVersion {
            short_name: code_system.short_name.clone(),
            effective_date,
            branch_path: branch_path.to_string(),
            internal_release,
        };
        let mut state = self.state.write().await;
        if state
            .versions
            .iter()
            .any(|v| v.short_name == version.short_name && v.effective_date == effective_date)
        {
            info!(
                "Code system version {} {} already recorded",
                version.short_name, effective_date
            );
            return Some(version);
        }
        info!("Created code system version {} {}", version.short_name, effective_date);
        state.versions.push(version.clone());
        Some(version)
    }

    /// Published versions, oldest first. Internal releases are only listed
    /// when requested.
    pub async fn find_versions(&self, short_name: &str, show_internal_releases: bool) -> Vec<CodeSystemVersion> {
        let state = self.state.read().await;
        let mut versions: Vec<CodeSystemVersion> = state
            .versions
            .iter()
            .filter(|v| v.short_name == short_name && (show_internal_releases || !v.internal_release))
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.effective_date);
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closest_code_system_walks_up_the_branch_tree() {
        let service = CodeSystemService::new();
        service
            .create_code_system(CodeSystem::new("SNOMEDCT", "MAIN"))
            .await
            .unwrap();
        service
            .create_code_system(CodeSystem::new("SNOMEDCT-XX", "MAIN/SNOMEDCT-XX"))
            .await
            .unwrap();

        let closest = service
            .find_closest_code_system_using_any_branch("MAIN/SNOMEDCT-XX/project/task")
            .await
            .unwrap();
        assert_eq!(closest.short_name, "SNOMEDCT-XX");

        let closest = service
            .find_closest_code_system_using_any_branch("MAIN/project")
            .await
            .unwrap();
        assert_eq!(closest.short_name, "SNOMEDCT");
    }

    #[tokio::test]
    async fn internal_releases_are_hidden_from_the_listing() {
        let service = CodeSystemService::new();
        service
            .create_code_system(CodeSystem::new("SNOMEDCT", "MAIN"))
            .await
            .unwrap();
        service
            .create_version_if_code_system_found_on_path("MAIN", 20230131, false)
            .await
            .unwrap();
        service
            .create_version_if_code_system_found_on_path("MAIN", 20230228, true)
            .await
            .unwrap();

        assert_eq!(service.find_versions("SNOMEDCT", false).await.len(), 1);
        assert_eq!(service.find_versions("SNOMEDCT", true).await.len(), 2);
    }
}
