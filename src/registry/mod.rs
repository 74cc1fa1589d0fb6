//! Asset registry service.
//!
//! Ties permission checks, blob storage and the store together. Payload bytes
//! are written before the store transaction that references them and removed
//! again if that transaction fails.

mod locks;
mod validation;

pub use validation::{
    MAX_DESCRIPTION_LEN, MAX_NAME_LEN, MAX_TAG_LEN, MAX_TAGS, MAX_TRI_COUNT, normalize_tags,
};

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::access::{AccessPredicate, evaluate};
use crate::error::{Error, Result};
use crate::extract::{GeometryExtractor, GeometryReport, MetadataExtractor};
use crate::storage::{BlobStorage, StorageError, sha256_hex};
use crate::store::path::payload_path;
use crate::store::{AuditReport, Store};
use crate::types::*;
use locks::AssetLocks;
use validation::{
    validate_asset_name, validate_description, validate_search, validate_tri_count,
};

pub const DEFAULT_POPULAR_LIMIT: u32 = 20;
pub const MAX_POPULAR_LIMIT: u32 = 100;
pub const MAX_TAG_SEARCH_RESULTS: u32 = 50;

/// Fields a caller supplies when registering a new asset.
#[derive(Debug, Clone)]
pub struct CreateAsset {
    pub name: String,
    pub description: String,
    pub format: AssetFormat,
    /// Overrides the extracted triangle count when set.
    pub tri_count: Option<i64>,
    pub tags: Vec<String>,
    pub use_case: Option<String>,
    pub access_level: AccessLevel,
    pub authorized_users: Vec<String>,
    pub authorized_institutions: Vec<String>,
    pub embargo_until: Option<DateTime<Utc>>,
    pub license: Option<String>,
    pub attribution_required: bool,
    pub lineage_id: Option<String>,
    pub derived_from: Vec<String>,
    pub auto_extract: bool,
}

impl CreateAsset {
    #[must_use]
    pub fn new(name: impl Into<String>, format: AssetFormat) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            format,
            tri_count: None,
            tags: Vec::new(),
            use_case: None,
            access_level: AccessLevel::Private,
            authorized_users: Vec::new(),
            authorized_institutions: Vec::new(),
            embargo_until: None,
            license: None,
            attribution_required: false,
            lineage_id: None,
            derived_from: Vec::new(),
            auto_extract: true,
        }
    }
}

/// An opened payload ready to stream to the caller.
pub struct Download<R> {
    pub asset: Asset,
    pub version: i64,
    pub reader: R,
    pub size: u64,
    pub checksum: String,
    pub file_name: String,
    pub mime_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInfo {
    pub category: TagCategory,
    pub description: &'static str,
    pub examples: &'static [&'static str],
}

pub struct Registry<B: BlobStorage> {
    store: Arc<dyn Store>,
    blobs: Arc<B>,
    extractor: Arc<dyn MetadataExtractor>,
    max_upload_bytes: u64,
    locks: AssetLocks,
}

impl<B: BlobStorage> Registry<B> {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<B>, max_upload_bytes: u64) -> Self {
        Self {
            store,
            blobs,
            extractor: Arc::new(GeometryExtractor),
            max_upload_bytes,
            locks: AssetLocks::default(),
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    // Assets

    pub async fn create_asset(
        &self,
        actor: &Actor,
        request: CreateAsset,
        data: Bytes,
    ) -> Result<Asset> {
        let owner_id = actor
            .user_id
            .clone()
            .ok_or_else(|| Error::BadRequest("authentication required".to_string()))?;
        let owner_institution = actor
            .institution
            .clone()
            .ok_or_else(|| Error::BadRequest("user has no institution".to_string()))?;

        let name = request.name.trim().to_string();
        validate_asset_name(&name)?;
        validate_description(&request.description)?;
        if let Some(tri_count) = request.tri_count {
            validate_tri_count(tri_count)?;
        }
        let tags = normalize_tags(&request.tags)?;
        self.check_size(&data)?;

        let report = if request.auto_extract {
            self.extract(request.format, data.clone()).await
        } else {
            None
        };
        let tri_count = request
            .tri_count
            .or_else(|| report.as_ref().and_then(|r| r.tri_count))
            .unwrap_or(0);
        let metadata = report.and_then(|r| serde_json::to_value(r).ok());

        let id = Uuid::new_v4().to_string();
        let path = payload_path(&id, 1, &name, request.format);
        let payload = self.put_payload(&path, &data).await?;

        let asset = NewAsset {
            id,
            lineage_id: request.lineage_id,
            name,
            description: request.description,
            format: request.format,
            tri_count,
            access: AccessControl {
                owner_id,
                owner_institution,
                access_level: request.access_level,
                authorized_users: request.authorized_users,
                authorized_institutions: request.authorized_institutions,
                embargo_until: request.embargo_until,
            },
            use_case: request.use_case,
            license: request.license,
            attribution_required: request.attribution_required,
            derived_from: request.derived_from,
            metadata,
            tags,
        };

        match self.store.create_asset(&asset, &payload, actor) {
            Ok((created, _)) => {
                tracing::info!(asset_id = %created.id, "Created asset '{}'", created.name);
                Ok(created)
            }
            Err(e) => {
                self.discard(&path).await;
                Err(e)
            }
        }
    }

    /// Loads an asset the actor may read.
    pub fn get_asset(&self, actor: &Actor, id: &str) -> Result<Asset> {
        let asset = self
            .store
            .get_asset(id)?
            .ok_or_else(|| Error::asset_not_found(id))?;
        evaluate(id, &asset.access, actor, Action::Read, Utc::now()).into_result()?;
        Ok(asset)
    }

    pub async fn download(
        &self,
        actor: &Actor,
        id: &str,
        version: Option<i64>,
    ) -> Result<Download<B::Reader>> {
        let asset = self.get_asset(actor, id)?;

        let (number, path, checksum) = match version {
            None => (asset.version, asset.file_path.clone(), asset.checksum.clone()),
            Some(n) => {
                let v = self.store.get_version(id, n)?.ok_or_else(|| {
                    Error::NotFound(format!("version {n} of asset '{id}'"))
                })?;
                (v.version_number, v.file_path, v.checksum)
            }
        };

        let (reader, size) = self.blobs.get(&path).await.map_err(|e| match e {
            StorageError::NotFound(p) => {
                tracing::error!(asset_id = id, "Payload missing from storage: {p}");
                Error::NotFound(format!("payload of asset '{id}' version {number}"))
            }
            e => e.into(),
        })?;

        let file_name = path.rsplit('/').next().unwrap_or(&path).to_string();
        let mime_type = asset.format.mime_type();

        Ok(Download {
            asset,
            version: number,
            reader,
            size,
            checksum,
            file_name,
            mime_type,
        })
    }

    /// Stores `data` as the asset's next version.
    ///
    /// Uploads to one asset are serialized in-process. If the store still
    /// reports a version conflict, the asset is re-read and the commit is
    /// retried once before the conflict is returned.
    pub async fn upload_version(
        &self,
        actor: &Actor,
        id: &str,
        data: Bytes,
        changes: Option<&str>,
    ) -> Result<AssetVersion> {
        self.check_size(&data)?;
        let _guard = self.locks.lock(id).await;

        let mut retried = false;
        loop {
            let asset = self
                .store
                .get_asset(id)?
                .ok_or_else(|| Error::asset_not_found(id))?;
            evaluate(id, &asset.access, actor, Action::Write, Utc::now()).into_result()?;

            let path = payload_path(id, asset.version + 1, &asset.name, asset.format);
            let payload = self.put_payload(&path, &data).await?;

            match self
                .store
                .commit_version(id, asset.version, &payload, actor, changes)
            {
                Ok(version) => {
                    tracing::info!(
                        asset_id = id,
                        version = version.version_number,
                        "Committed new version"
                    );
                    return Ok(version);
                }
                // The competing writer owns this path now.
                Err(Error::Conflict(reason)) if !retried => {
                    tracing::info!(asset_id = id, "Version conflict, retrying: {reason}");
                    retried = true;
                }
                Err(e @ Error::Conflict(_)) => return Err(e),
                Err(e) => {
                    self.discard(&path).await;
                    return Err(e);
                }
            }
        }
    }

    pub fn update_details(&self, actor: &Actor, id: &str, update: &AssetUpdate) -> Result<Asset> {
        let update = AssetUpdate {
            name: update.name.as_deref().map(str::trim).map(str::to_string),
            description: update.description.clone(),
        };
        if let Some(name) = &update.name {
            validate_asset_name(name)?;
        }
        if let Some(description) = &update.description {
            validate_description(description)?;
        }
        self.store.update_asset_details(id, actor, &update)
    }

    pub async fn delete_asset(&self, actor: &Actor, id: &str) -> Result<()> {
        let _guard = self.locks.lock(id).await;

        let removed = self.store.delete_asset(id, actor)?;
        for version in &removed {
            self.discard(&version.file_path).await;
        }

        tracing::info!(asset_id = id, versions = removed.len(), "Deleted asset");
        Ok(())
    }

    /// Version history, newest first.
    pub fn list_versions(&self, actor: &Actor, id: &str) -> Result<Vec<AssetVersion>> {
        self.get_asset(actor, id)?;
        self.store.list_versions(id)
    }

    pub fn get_version(&self, actor: &Actor, id: &str, number: i64) -> Result<AssetVersion> {
        self.get_asset(actor, id)?;
        self.store
            .get_version(id, number)?
            .ok_or_else(|| Error::NotFound(format!("version {number} of asset '{id}'")))
    }

    pub fn search(&self, actor: &Actor, query: &SearchQuery) -> Result<AssetPage> {
        validate_search(query)?;
        let predicate = AccessPredicate::for_actor(actor, Utc::now());
        self.store.search_assets(&predicate, query)
    }

    // Tags

    pub fn attach_tags(&self, actor: &Actor, id: &str, names: &[String]) -> Result<Vec<Tag>> {
        let names = normalize_tags(names)?;
        self.store.attach_tags(id, actor, &names)
    }

    pub fn replace_tags(&self, actor: &Actor, id: &str, names: &[String]) -> Result<Vec<Tag>> {
        let names = normalize_tags(names)?;
        self.store.replace_tags(id, actor, &names)
    }

    pub fn list_tags(&self, category: Option<TagCategory>) -> Result<Vec<Tag>> {
        self.store.list_tags(category)
    }

    pub fn popular_tags(&self, limit: Option<u32>) -> Result<Vec<Tag>> {
        let limit = limit
            .unwrap_or(DEFAULT_POPULAR_LIMIT)
            .clamp(1, MAX_POPULAR_LIMIT);
        self.store.popular_tags(limit)
    }

    pub fn search_tags(&self, query: &str) -> Result<Vec<Tag>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::BadRequest("Search query cannot be empty".to_string()));
        }
        self.store.search_tags(query, MAX_TAG_SEARCH_RESULTS)
    }

    #[must_use]
    pub fn categories(&self) -> Vec<CategoryInfo> {
        TagCategory::ALL
            .into_iter()
            .map(|category| CategoryInfo {
                category,
                description: category.description(),
                examples: category.examples(),
            })
            .collect()
    }

    pub fn audit(&self) -> Result<AuditReport> {
        self.store.audit()
    }

    // Helpers

    fn check_size(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::BadRequest("File is empty".to_string()));
        }
        if data.len() as u64 > self.max_upload_bytes {
            return Err(Error::PayloadTooLarge {
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    async fn extract(&self, format: AssetFormat, data: Bytes) -> Option<GeometryReport> {
        let extractor = Arc::clone(&self.extractor);
        match tokio::task::spawn_blocking(move || extractor.extract(format, &data)).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                tracing::warn!("Metadata extraction failed: {e}");
                None
            }
            Err(e) => {
                tracing::warn!("Metadata extraction task failed: {e}");
                None
            }
        }
    }

    async fn put_payload(&self, path: &str, data: &[u8]) -> Result<Payload> {
        let file_size = self.blobs.put(path, data).await?;
        Ok(Payload {
            file_path: path.to_string(),
            file_size: i64::try_from(file_size)
                .map_err(|_| Error::PayloadTooLarge { limit: self.max_upload_bytes })?,
            checksum: sha256_hex(data),
        })
    }

    async fn discard(&self, path: &str) {
        if let Err(e) = self.blobs.delete(path).await {
            tracing::warn!("Failed to remove payload '{path}': {e}");
        }
    }
}
