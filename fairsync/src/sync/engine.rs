use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fairsync_core::{PortalClient, PortalError, ProjectRecord, RecordMap, RemoteRef};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{CacheError, CacheStore};
use super::localize::{LocalizeError, resolve_local_paths};
use super::merge::{SourceKind, SourceSet, merge_sources};
use super::team_patch::patch_team_files;
use super::transfer::{TransferClient, TransferError};
use super::tree::RemoteTreeCache;

/// File types the judges screen lists again under another label; syncing
/// them twice would only duplicate work.
const DUPLICATE_LABELS: [&str; 3] = ["Abstract Form", "1C", "7"];

/// The visual artifacts a reviewer needs linked under the for-review tree.
const REVIEW_LABELS: [&str; 5] = [
    "Abstract",
    "Quad Chart",
    "Project Presentation Slides",
    "Research Paper",
    "Lab Notebook",
];

const MERGED_CACHE_KEY: &str = "merged_records.json";
const PATCHED_CACHE_KEY: &str = "patched_records.json";
const LOCALIZED_CACHE_KEY: &str = "localized_records.json";

const BY_PROJECT_DIR: &str = "by project";
const FOR_REVIEW_DIR: &str = "for review";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("portal error: {0}")]
    Portal(#[from] PortalError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("path resolution error: {0}")]
    Localize(#[from] LocalizeError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("can't download files without an authenticated portal session")]
    PortalUnauthenticated,
    #[error("can't upload files without a drive session")]
    MissingDriveSession,
}

/// Run flags, surfaced by the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub download: bool,
    pub upload: bool,
    /// Ignore every source cache and refetch.
    pub refresh: bool,
    /// Re-download files even when a local copy exists.
    pub force: bool,
}

/// Cache lifetimes per source, plus the merged/patched intermediates.
#[derive(Debug, Clone, Copy)]
pub struct SourceTtls {
    pub project: Duration,
    pub file: Duration,
    pub form: Duration,
    pub merged: Duration,
}

impl Default for SourceTtls {
    fn default() -> Self {
        Self {
            project: Duration::from_secs(9000),
            file: Duration::from_secs(9000),
            form: Duration::from_secs(12000),
            merged: Duration::from_secs(9000),
        }
    }
}

impl SourceTtls {
    fn for_source(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Project => self.project,
            SourceKind::File => self.file,
            SourceKind::Form => self.form,
        }
    }
}

/// Drives one sync cycle: refresh the source caches, merge, resolve local
/// paths, then mirror files down from the portal and up to the drive.
///
/// Phases run strictly in order and each persists its output to the cache
/// store before the next starts, so an interrupted run resumes from cached
/// state instead of repeating expensive network work. Per-file operations
/// are idempotent: a file that failed stays unfresh and is retried on the
/// next cycle.
pub struct SyncEngine {
    portal: PortalClient,
    tree: Option<RemoteTreeCache>,
    cache: CacheStore,
    transfer: TransferClient,
    file_root: PathBuf,
    drive_root: String,
    ttls: SourceTtls,
    patch_team: bool,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        portal: PortalClient,
        tree: Option<RemoteTreeCache>,
        cache: CacheStore,
        file_root: PathBuf,
        drive_root: String,
        options: SyncOptions,
    ) -> Self {
        Self {
            portal,
            tree,
            cache,
            transfer: TransferClient::new(),
            file_root,
            drive_root,
            ttls: SourceTtls::default(),
            patch_team: false,
            options,
        }
    }

    pub fn with_ttls(mut self, ttls: SourceTtls) -> Self {
        self.ttls = ttls;
        self
    }

    pub fn with_team_patch(mut self, enabled: bool) -> Self {
        self.patch_team = enabled;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferClient) -> Self {
        self.transfer = transfer;
        self
    }

    pub async fn run(&mut self) -> Result<RecordMap, EngineError> {
        if self.options.download && !self.portal.is_authenticated() {
            return Err(EngineError::PortalUnauthenticated);
        }
        if self.options.upload && self.tree.is_none() {
            return Err(EngineError::MissingDriveSession);
        }

        info!("refreshing source caches");
        let sources = self.refresh_sources().await?;

        info!("merging source records");
        let mut records = merge_sources(sources);
        self.cache.write_as(MERGED_CACHE_KEY, &records).await?;

        if self.patch_team {
            records = self.patched_records(records).await?;
        }

        info!("resolving local paths");
        resolve_local_paths(&self.file_root, &mut records).await?;
        self.cache.write_as(LOCALIZED_CACHE_KEY, &records).await?;

        if self.options.download {
            info!("syncing portal files to the local mirror");
            self.download_phase(&records).await;
            // Re-resolve so freshness reflects what just landed on disk.
            resolve_local_paths(&self.file_root, &mut records).await?;
            self.cache.write_as(LOCALIZED_CACHE_KEY, &records).await?;
        } else {
            info!("skipping the local download phase");
        }

        if self.options.upload {
            info!("pushing local files to the drive");
            self.upload_phase(&records).await?;
        } else {
            info!("skipping the drive upload phase");
        }

        Ok(records)
    }

    async fn refresh_sources(&mut self) -> Result<SourceSet, EngineError> {
        Ok(SourceSet {
            project: self.source_records(SourceKind::Project).await?,
            file: self.source_records(SourceKind::File).await?,
            form: self.source_records(SourceKind::Form).await?,
        })
    }

    async fn source_records(&mut self, kind: SourceKind) -> Result<RecordMap, EngineError> {
        let max_age = if self.options.refresh {
            Duration::ZERO
        } else {
            self.ttls.for_source(kind)
        };
        if let Some(records) = self.cache.read_as::<RecordMap>(kind.cache_key(), max_age).await {
            debug!(source = kind.label(), "using cached source records");
            return Ok(records);
        }
        info!(source = kind.label(), "fetching source records from the portal");
        let records = self.fetch_source_with_reauth(kind).await?;
        self.cache.write_as(kind.cache_key(), &records).await?;
        Ok(records)
    }

    async fn fetch_source_with_reauth(&mut self, kind: SourceKind) -> Result<RecordMap, EngineError> {
        match self.fetch_source(kind).await {
            Ok(records) => Ok(records),
            Err(err) if err.is_auth_expired() => {
                self.relogin_once(kind.label()).await?;
                Ok(self.fetch_source(kind).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_source(&mut self, kind: SourceKind) -> Result<RecordMap, PortalError> {
        match kind {
            SourceKind::Project => self.portal.fetch_project_tab().await,
            SourceKind::File => self.portal.fetch_files_tab().await,
            SourceKind::Form => self.portal.fetch_forms_tab().await,
        }
    }

    /// The session (or its CSRF token) went stale; re-authenticate exactly
    /// once before retrying the failed call.
    async fn relogin_once(&mut self, what: &str) -> Result<(), EngineError> {
        warn!(operation = what, "portal session expired; re-authenticating once");
        if !self.portal.login().await? {
            return Err(EngineError::PortalUnauthenticated);
        }
        Ok(())
    }

    async fn patched_records(&mut self, records: RecordMap) -> Result<RecordMap, EngineError> {
        let max_age = if self.options.refresh {
            Duration::ZERO
        } else {
            self.ttls.merged
        };
        if let Some(cached) = self.cache.read_as::<RecordMap>(PATCHED_CACHE_KEY, max_age).await {
            debug!("using cached team-patched records");
            return Ok(cached);
        }
        info!("patching per-member file info for team projects");
        let mut records = records;
        patch_team_files(&mut self.portal, &mut records).await;
        self.cache.write_as(PATCHED_CACHE_KEY, &records).await?;
        Ok(records)
    }

    async fn download_phase(&mut self, records: &RecordMap) {
        for (id, record) in records {
            for (label, slot) in &record.files {
                if DUPLICATE_LABELS.contains(&label.as_str()) {
                    continue;
                }
                for (index, remote_ref) in slot.remote_refs.iter().enumerate() {
                    if remote_ref.is_blank() {
                        continue;
                    }
                    let Some(Some(relative)) = slot.local_paths.get(index) else {
                        continue;
                    };
                    let fresh = slot.local_modified.get(index).copied().flatten();
                    if fresh.is_some() && !self.options.force {
                        continue;
                    }
                    let target = self.file_root.join(relative);
                    match self.download_one(remote_ref, &target).await {
                        Ok(()) => debug!(entity = %id, path = %relative, "downloaded"),
                        Err(err) => {
                            warn!(entity = %id, path = %relative, error = %err, "download failed; will retry next cycle");
                        }
                    }
                }
            }
        }
    }

    async fn download_one(&mut self, remote_ref: &RemoteRef, target: &Path) -> Result<(), EngineError> {
        let response = match self.fetch_file(remote_ref).await {
            Ok(response) => response,
            Err(err) if err.is_auth_expired() => {
                self.relogin_once("file download").await?;
                self.fetch_file(remote_ref).await?
            }
            Err(err) => return Err(err.into()),
        };
        self.transfer
            .download_response_to_path(response, target)
            .await?;
        Ok(())
    }

    async fn fetch_file(&mut self, remote_ref: &RemoteRef) -> Result<reqwest::Response, PortalError> {
        match remote_ref {
            RemoteRef::Bucket(url) => self.portal.download_bucket(url).await,
            RemoteRef::Portal(name) => self.portal.download_milestone_file(name).await,
        }
    }

    async fn upload_phase(&mut self, records: &RecordMap) -> Result<(), EngineError> {
        let tree = self.tree.as_mut().ok_or(EngineError::MissingDriveSession)?;

        let mut by_project: BTreeMap<&str, &ProjectRecord> = BTreeMap::new();
        for record in records.values() {
            if let Some(number) = record.project_number.as_deref() {
                by_project.insert(number, record);
            }
        }

        for (project_number, record) in &by_project {
            for (label, slot) in &record.files {
                if DUPLICATE_LABELS.contains(&label.as_str()) {
                    continue;
                }
                for relative in slot.local_paths.iter().flatten() {
                    let local = self.file_root.join(relative);
                    if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                        continue;
                    }
                    let remote_path =
                        format!("{}/{BY_PROJECT_DIR}/{relative}", self.drive_root);
                    if tree.create_file(&local, &remote_path).await.is_none() {
                        warn!(path = %relative, "drive upload failed; will retry next cycle");
                        continue;
                    }
                    let review_dir =
                        format!("{}/{FOR_REVIEW_DIR}/{project_number}", self.drive_root);
                    tree.create_folder(&review_dir, false).await;
                }
            }
        }

        // Pick up everything just created before wiring the review links.
        if let Err(err) = tree.list_all(true).await {
            warn!(error = %err, "drive relist failed; skipping the review-link pass");
            return Ok(());
        }

        for (project_number, record) in &by_project {
            for (label, slot) in &record.files {
                if DUPLICATE_LABELS.contains(&label.as_str())
                    || !REVIEW_LABELS.contains(&label.as_str())
                {
                    continue;
                }
                for relative in slot.local_paths.iter().flatten() {
                    let local = self.file_root.join(relative);
                    if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
                        continue;
                    }
                    let remote_path =
                        format!("{}/{BY_PROJECT_DIR}/{relative}", self.drive_root);
                    let review_dir =
                        format!("{}/{FOR_REVIEW_DIR}/{project_number}", self.drive_root);
                    let display_name = relative.rsplit('/').next().unwrap_or(relative);
                    if tree
                        .create_shortcut(&remote_path, &review_dir, display_name)
                        .await
                        .is_none()
                    {
                        warn!(path = %relative, "review link failed; will retry next cycle");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
