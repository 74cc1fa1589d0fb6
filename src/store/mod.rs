pub mod ledger;
pub mod path;
mod schema;
mod sqlite;
pub mod versions;

pub use sqlite::SqliteStore;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::access::AccessPredicate;
use crate::error::{Error, Result};
use crate::types::*;

/// Store defines the database interface.
///
/// Every mutating operation runs in a single transaction that re-evaluates the
/// actor's permission against the row it is about to change, so a mutation and
/// its version and tag-counter effects commit or roll back together.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Asset operations
    fn create_asset(
        &self,
        asset: &NewAsset,
        payload: &Payload,
        actor: &Actor,
    ) -> Result<(Asset, AssetVersion)>;
    fn get_asset(&self, id: &str) -> Result<Option<Asset>>;
    fn search_assets(&self, predicate: &AccessPredicate, query: &SearchQuery) -> Result<AssetPage>;
    fn update_asset_details(&self, id: &str, actor: &Actor, update: &AssetUpdate) -> Result<Asset>;
    /// Deletes the asset with its whole version history and returns the
    /// removed version records.
    fn delete_asset(&self, id: &str, actor: &Actor) -> Result<Vec<AssetVersion>>;

    // Version operations
    /// Appends version `expected_version + 1`. Fails with [`Error::Conflict`]
    /// if the asset has moved past `expected_version` in the meantime.
    fn commit_version(
        &self,
        id: &str,
        expected_version: i64,
        payload: &Payload,
        actor: &Actor,
        changes: Option<&str>,
    ) -> Result<AssetVersion>;
    fn list_versions(&self, asset_id: &str) -> Result<Vec<AssetVersion>>;
    fn get_version(&self, asset_id: &str, version_number: i64) -> Result<Option<AssetVersion>>;

    // Tag operations (many-to-many with assets)
    fn attach_tags(&self, asset_id: &str, actor: &Actor, names: &[String]) -> Result<Vec<Tag>>;
    fn replace_tags(&self, asset_id: &str, actor: &Actor, names: &[String]) -> Result<Vec<Tag>>;
    fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;
    fn list_tags(&self, category: Option<TagCategory>) -> Result<Vec<Tag>>;
    fn popular_tags(&self, limit: u32) -> Result<Vec<Tag>>;
    fn search_tags(&self, query: &str, limit: u32) -> Result<Vec<Tag>>;

    /// Recomputes the denormalized tag counters and version histories and
    /// reports every disagreement with the stored values.
    fn audit(&self) -> Result<AuditReport>;

    // Monitoring
    /// Round-trips a trivial query to prove the database answers.
    fn ping(&self) -> Result<()>;
    fn storage_stats(&self) -> Result<StorageStats>;
}

/// Totals over current payloads. Superseded versions are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub total_assets: i64,
    pub total_storage_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagDrift {
    pub tag: String,
    pub recorded: i64,
    pub actual: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionGap {
    pub asset_id: String,
    pub version: i64,
    pub rows: i64,
    pub lowest: Option<i64>,
    pub highest: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub tag_drift: Vec<TagDrift>,
    pub version_gaps: Vec<VersionGap>,
    /// Assets whose current file pointer does not mirror their latest version.
    pub stale_pointers: Vec<String>,
    pub orphaned_versions: i64,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.tag_drift.is_empty()
            && self.version_gaps.is_empty()
            && self.stale_pointers.is_empty()
            && self.orphaned_versions == 0
    }

    /// Fails with [`Error::InvalidState`] describing the first class of finding.
    pub fn into_result(self) -> Result<()> {
        if let Some(drift) = self.tag_drift.first() {
            return Err(Error::InvalidState(format!(
                "tag '{}' records {} uses but {} assets reference it",
                drift.tag, drift.recorded, drift.actual
            )));
        }
        if let Some(gap) = self.version_gaps.first() {
            return Err(Error::InvalidState(format!(
                "asset '{}' is at version {} but has {} version rows",
                gap.asset_id, gap.version, gap.rows
            )));
        }
        if let Some(id) = self.stale_pointers.first() {
            return Err(Error::InvalidState(format!(
                "asset '{id}' does not point at its latest version"
            )));
        }
        if self.orphaned_versions > 0 {
            return Err(Error::InvalidState(format!(
                "{} version rows have no owning asset",
                self.orphaned_versions
            )));
        }
        Ok(())
    }
}

/// Fixed-width UTC timestamp so stored values order lexicographically.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}
