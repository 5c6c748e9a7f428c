// rf2_import/src/reader.rs

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use log::{info, warn};
use models::errors::{ServiceError, ServiceResult};

use crate::effective_time::effective_time_from_column;
use crate::job::Rf2Type;

/// Push-style consumer of RF2 rows, one callback per component kind. A
/// single worker drives all callbacks for one import; implementations rely
/// on that single-writer contract.
#[async_trait]
pub trait ComponentFactory: Send {
    async fn loading_components_starting(&mut self) -> ServiceResult<()>;
    async fn loading_components_completed(&mut self) -> ServiceResult<()>;

    /// Full imports only: brackets the rows of one release date.
    async fn loading_release_delta_starting(&mut self, _effective_time: i32) -> ServiceResult<()> {
        Ok(())
    }

    async fn loading_release_delta_finished(&mut self, _effective_time: i32) -> ServiceResult<()> {
        Ok(())
    }

    async fn new_concept_state(
        &mut self,
        concept_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        definition_status_id: &str,
    ) -> ServiceResult<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> ServiceResult<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> ServiceResult<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> ServiceResult<()>;

    async fn new_identifier_state(
        &mut self,
        alternate_identifier: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> ServiceResult<()>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> ServiceResult<()>;
}

/// Filters applied while reading an archive: optional module allow-list and
/// the per-module effective-time cutoff used by snapshot imports.
#[derive(Debug, Clone, Default)]
pub struct LoadingProfile {
    pub module_ids: HashSet<String>,
    pub module_effective_time_filter: HashMap<String, i32>,
}

impl LoadingProfile {
    pub fn complete() -> Self {
        LoadingProfile::default()
    }

    pub fn with_module_ids<I: IntoIterator<Item = String>>(mut self, module_ids: I) -> Self {
        self.module_ids = module_ids.into_iter().collect();
        self
    }

    pub fn with_module_effective_time_filter(mut self, filter: HashMap<String, i32>) -> Self {
        self.module_effective_time_filter = filter;
        self
    }

    fn accepts(&self, module_id: &str, effective_time: &str) -> bool {
        if !self.module_ids.is_empty() && !self.module_ids.contains(module_id) {
            return false;
        }
        if let Some(cutoff) = self.module_effective_time_filter.get(module_id) {
            if let Some(row_time) = effective_time_from_column(effective_time) {
                if row_time <= *cutoff {
                    return false;
                }
            }
        }
        true
    }
}

/// One already-unpacked release file: tab-separated rows under a header
/// line listing the field names.
#[derive(Debug, Clone)]
pub struct Rf2File {
    pub name: String,
    pub content: String,
}

impl Rf2File {
    pub fn new(name: &str, content: &str) -> Self {
        Rf2File {
            name: name.to_string(),
            content: content.to_string(),
        }
    }
}

/// The standard RF2 archive layout, already unpacked by the upload edge.
#[derive(Debug, Clone, Default)]
pub struct Rf2Archive {
    pub files: Vec<Rf2File>,
}

impl Rf2Archive {
    pub fn new(files: Vec<Rf2File>) -> Self {
        Rf2Archive { files }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Concept,
    Description,
    Relationship,
    ConcreteRelationship,
    Identifier,
    RefsetMember,
}

fn detect_file_kind(name: &str) -> Option<FileKind> {
    // Concrete values before the general relationship pattern; both share
    // the "sct2_Relationship" stem.
    if name.contains("sct2_RelationshipConcreteValues_") {
        Some(FileKind::ConcreteRelationship)
    } else if name.contains("sct2_Relationship_") || name.contains("sct2_StatedRelationship_") {
        Some(FileKind::Relationship)
    } else if name.contains("sct2_Concept_") {
        Some(FileKind::Concept)
    } else if name.contains("sct2_Description_") || name.contains("sct2_TextDefinition_") {
        Some(FileKind::Description)
    } else if name.contains("sct2_Identifier_") {
        Some(FileKind::Identifier)
    } else if name.contains("der2_") {
        Some(FileKind::RefsetMember)
    } else {
        None
    }
}

struct ParsedFile {
    kind: FileKind,
    field_names: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn minimum_columns(kind: FileKind) -> usize {
    match kind {
        FileKind::Concept => 5,
        FileKind::Description => 9,
        FileKind::Relationship | FileKind::ConcreteRelationship => 10,
        FileKind::Identifier | FileKind::RefsetMember => 6,
    }
}

fn parse_file(file: &Rf2File, kind: FileKind) -> ServiceResult<ParsedFile> {
    let mut lines = file.content.lines();
    let header = lines
        .next()
        .ok_or_else(|| ServiceError::Conversion(format!("Release file {} is empty", file.name)))?;
    let field_names: Vec<String> = header.split('\t').map(str::to_string).collect();
    if field_names.len() < minimum_columns(kind) {
        return Err(ServiceError::Conversion(format!(
            "Release file {} header has {} columns, expected at least {}",
            file.name,
            field_names.len(),
            minimum_columns(kind)
        )));
    }
    let expected = field_names.len();
    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let columns: Vec<String> = line.split('\t').map(str::to_string).collect();
        if columns.len() != expected {
            return Err(ServiceError::Conversion(format!(
                "Release file {} row has {} columns, header has {}",
                file.name,
                columns.len(),
                expected
            )));
        }
        rows.push(columns);
    }
    Ok(ParsedFile {
        kind,
        field_names,
        rows,
    })
}

/// Reads release files and pushes their rows through a component factory.
#[derive(Default)]
pub struct ReleaseImporter;

impl ReleaseImporter {
    pub fn new() -> Self {
        ReleaseImporter
    }

    pub async fn load_delta_release_files(
        &self,
        archive: &Rf2Archive,
        profile: &LoadingProfile,
        factory: &mut dyn ComponentFactory,
    ) -> ServiceResult<()> {
        self.load_flat_release_files(archive, profile, factory, Rf2Type::Delta).await
    }

    pub async fn load_snapshot_release_files(
        &self,
        archive: &Rf2Archive,
        profile: &LoadingProfile,
        factory: &mut dyn ComponentFactory,
    ) -> ServiceResult<()> {
        self.load_flat_release_files(archive, profile, factory, Rf2Type::Snapshot).await
    }

    /// Full archives carry every historical version; rows are delivered
    /// grouped by release date, ascending, with the release bracketing
    /// callbacks around each group.
    pub async fn load_full_release_files(
        &self,
        archive: &Rf2Archive,
        profile: &LoadingProfile,
        factory: &mut dyn ComponentFactory,
    ) -> ServiceResult<()> {
        let files = self.parse_files(archive, "Full")?;
        factory.loading_components_starting().await?;

        let mut release_dates: BTreeMap<i32, Vec<(usize, usize)>> = BTreeMap::new();
        for (file_index, file) in files.iter().enumerate() {
            for (row_index, row) in file.rows.iter().enumerate() {
                let effective_time = effective_time_from_column(&row[1]).unwrap_or(0);
                release_dates.entry(effective_time).or_default().push((file_index, row_index));
            }
        }

        for (effective_time, row_refs) in release_dates {
            factory.loading_release_delta_starting(effective_time).await?;
            // Core components land before members within each release.
            for kind in [
                FileKind::Concept,
                FileKind::Description,
                FileKind::Relationship,
                FileKind::ConcreteRelationship,
                FileKind::Identifier,
                FileKind::RefsetMember,
            ] {
                for (file_index, row_index) in &row_refs {
                    let file = &files[*file_index];
                    if file.kind == kind {
                        self.dispatch_row(file, &file.rows[*row_index], profile, factory).await?;
                    }
                }
            }
            factory.loading_release_delta_finished(effective_time).await?;
        }
        factory.loading_components_completed().await
    }

    async fn load_flat_release_files(
        &self,
        archive: &Rf2Archive,
        profile: &LoadingProfile,
        factory: &mut dyn ComponentFactory,
        rf2_type: Rf2Type,
    ) -> ServiceResult<()> {
        let type_token = match rf2_type {
            Rf2Type::Delta => "Delta",
            Rf2Type::Snapshot => "Snapshot",
            Rf2Type::Full => "Full",
        };
        let files = self.parse_files(archive, type_token)?;
        factory.loading_components_starting().await?;
        for file in &files {
            info!("Loading {} rows from release file kind {:?}", file.rows.len(), file.kind);
            for row in &file.rows {
                self.dispatch_row(file, row, profile, factory).await?;
            }
        }
        factory.loading_components_completed().await
    }

    fn parse_files(&self, archive: &Rf2Archive, type_token: &str) -> ServiceResult<Vec<ParsedFile>> {
        let mut files = Vec::new();
        for file in &archive.files {
            if !file.name.contains(type_token) {
                continue;
            }
            match detect_file_kind(&file.name) {
                Some(kind) => files.push(parse_file(file, kind)?),
                None => warn!("Ignoring unrecognised release file {}", file.name),
            }
        }
        Ok(files)
    }

    async fn dispatch_row(
        &self,
        file: &ParsedFile,
        row: &[String],
        profile: &LoadingProfile,
        factory: &mut dyn ComponentFactory,
    ) -> ServiceResult<()> {
        if !profile.accepts(&row[3], &row[1]) {
            return Ok(());
        }
        match file.kind {
            FileKind::Concept => {
                factory
                    .new_concept_state(&row[0], &row[1], &row[2], &row[3], &row[4])
                    .await
            }
            FileKind::Description => {
                factory
                    .new_description_state(
                        &row[0], &row[1], &row[2], &row[3], &row[4], &row[5], &row[6], &row[7], &row[8],
                    )
                    .await
            }
            FileKind::Relationship => {
                factory
                    .new_relationship_state(
                        &row[0], &row[1], &row[2], &row[3], &row[4], &row[5], &row[6], &row[7], &row[8],
                        &row[9],
                    )
                    .await
            }
            FileKind::ConcreteRelationship => {
                factory
                    .new_concrete_relationship_state(
                        &row[0], &row[1], &row[2], &row[3], &row[4], &row[5], &row[6], &row[7], &row[8],
                        &row[9],
                    )
                    .await
            }
            FileKind::Identifier => {
                factory
                    .new_identifier_state(&row[0], &row[1], &row[2], &row[3], &row[4], &row[5])
                    .await
            }
            FileKind::RefsetMember => {
                factory
                    .new_reference_set_member_state(
                        &file.field_names,
                        &row[0],
                        &row[1],
                        &row[2],
                        &row[3],
                        &row[4],
                        &row[5],
                        &row[6..],
                    )
                    .await
            }
        }
    }
}
