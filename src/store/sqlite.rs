use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};

use super::schema::SCHEMA;
use super::{AuditReport, StorageStats, Store, format_datetime, ledger, parse_datetime, versions};
use crate::access::{AccessPredicate, evaluate};
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        register_functions(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// SQLite's own `lower()` and `LIKE` only fold ASCII letters.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|s| s.to_lowercase()))
        },
    )
}

const ASSET_COLUMNS: &str = "assets.id, assets.lineage_id, assets.name, assets.description, \
     assets.format, assets.tri_count, assets.version, assets.file_path, assets.file_size, \
     assets.checksum, assets.owner_id, assets.owner_institution, assets.access_level, \
     assets.authorized_users, assets.authorized_institutions, assets.embargo_until, \
     assets.use_case, assets.license, assets.attribution_required, assets.derived_from, \
     assets.metadata, assets.created_at, assets.updated_at";

fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    let id: String = row.get(0)?;
    let format: String = row.get(4)?;
    let format = format.parse::<AssetFormat>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let access_level = parse_access_level(&id, &row.get::<_, String>(12)?);

    Ok(Asset {
        lineage_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        format,
        tri_count: row.get(5)?,
        version: row.get(6)?,
        file_path: row.get(7)?,
        file_size: row.get(8)?,
        checksum: row.get(9)?,
        access: AccessControl {
            owner_id: row.get(10)?,
            owner_institution: row.get(11)?,
            access_level,
            authorized_users: parse_json_list(row.get(13)?),
            authorized_institutions: parse_json_list(row.get(14)?),
            embargo_until: row
                .get::<_, Option<String>>(15)?
                .map(|s| parse_datetime(&s)),
        },
        use_case: row.get(16)?,
        license: row.get(17)?,
        attribution_required: row.get(18)?,
        derived_from: parse_json_list(row.get(19)?),
        metadata: row
            .get::<_, Option<String>>(20)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        tags: Vec::new(),
        created_at: parse_datetime(&row.get::<_, String>(21)?),
        updated_at: parse_datetime(&row.get::<_, String>(22)?),
        id,
    })
}

/// An unreadable level is treated as the most restrictive one.
fn parse_access_level(asset_id: &str, s: &str) -> AccessLevel {
    s.parse().unwrap_or_else(|e| {
        tracing::warn!(asset_id, "{e}; treating asset as private");
        AccessLevel::Private
    })
}

fn parse_json_list(s: Option<String>) -> Vec<String> {
    let Some(s) = s else {
        return Vec::new();
    };
    serde_json::from_str(&s).unwrap_or_else(|e| {
        tracing::error!("Invalid JSON list in database: '{}' - {}", s, e);
        Vec::new()
    })
}

fn to_json_list(list: &[String]) -> String {
    serde_json::Value::from(list.to_vec()).to_string()
}

/// Case-folded substring pattern, matched against `unicode_lower(column)`.
fn like_pattern(q: &str) -> String {
    let escaped = q
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn load_asset(conn: &Connection, id: &str) -> Result<Option<Asset>> {
    let asset = conn
        .query_row(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE assets.id = ?1"),
            params![id],
            asset_from_row,
        )
        .optional()?;

    match asset {
        Some(mut asset) => {
            load_tag_names(conn, &mut asset)?;
            Ok(Some(asset))
        }
        None => Ok(None),
    }
}

fn load_tag_names(conn: &Connection, asset: &mut Asset) -> Result<()> {
    asset.tags = ledger::for_asset(conn, &asset.id)?
        .into_iter()
        .map(|tag| tag.name)
        .collect();
    Ok(())
}

/// Re-reads the asset's authorization attributes and evaluates `action`
/// against them. Returns the asset's current version.
fn authorize(conn: &Connection, id: &str, actor: &Actor, action: Action) -> Result<i64> {
    let (acl, version) = conn
        .query_row(
            "SELECT owner_id, owner_institution, access_level, authorized_users,
                    authorized_institutions, embargo_until, version
             FROM assets WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    AccessControl {
                        owner_id: row.get(0)?,
                        owner_institution: row.get(1)?,
                        access_level: parse_access_level(id, &row.get::<_, String>(2)?),
                        authorized_users: parse_json_list(row.get(3)?),
                        authorized_institutions: parse_json_list(row.get(4)?),
                        embargo_until: row
                            .get::<_, Option<String>>(5)?
                            .map(|s| parse_datetime(&s)),
                    },
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| Error::asset_not_found(id))?;

    evaluate(id, &acl, actor, action, Utc::now()).into_result()?;
    Ok(version)
}

fn actor_id(actor: &Actor) -> Result<&str> {
    actor
        .user_id
        .as_deref()
        .ok_or_else(|| Error::BadRequest("an authenticated actor is required".to_string()))
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Asset operations

    fn create_asset(
        &self,
        asset: &NewAsset,
        payload: &Payload,
        actor: &Actor,
    ) -> Result<(Asset, AssetVersion)> {
        let created_by = actor_id(actor)?;
        if asset.access.owner_id != created_by {
            return Err(Error::BadRequest(
                "asset owner must be the creating user".to_string(),
            ));
        }

        let now = Utc::now();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let result = tx.execute(
            "INSERT INTO assets (
                 id, lineage_id, name, description, format, tri_count,
                 version, file_path, file_size, checksum,
                 owner_id, owner_institution, access_level,
                 authorized_users, authorized_institutions, embargo_until,
                 use_case, license, attribution_required, derived_from, metadata,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?21)",
            params![
                asset.id,
                asset.lineage_id,
                asset.name,
                asset.description,
                asset.format.as_str(),
                asset.tri_count,
                payload.file_path,
                payload.file_size,
                payload.checksum,
                asset.access.owner_id,
                asset.access.owner_institution,
                asset.access.access_level.as_str(),
                to_json_list(&asset.access.authorized_users),
                to_json_list(&asset.access.authorized_institutions),
                asset.access.embargo_until.as_ref().map(format_datetime),
                asset.use_case,
                asset.license,
                asset.attribution_required,
                to_json_list(&asset.derived_from),
                asset.metadata.as_ref().map(serde_json::Value::to_string),
                format_datetime(&now),
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::Conflict(format!(
                    "asset '{}' already exists",
                    asset.id
                )));
            }
            Err(e) => return Err(Error::from(e)),
        }

        let version = versions::record_initial(&tx, &asset.id, payload, created_by, now)?;
        ledger::attach(&tx, &asset.id, &asset.tags, now)?;

        let created = load_asset(&tx, &asset.id)?.ok_or_else(|| Error::asset_not_found(&asset.id))?;
        tx.commit()?;
        Ok((created, version))
    }

    fn get_asset(&self, id: &str) -> Result<Option<Asset>> {
        load_asset(&self.conn(), id)
    }

    fn search_assets(&self, predicate: &AccessPredicate, query: &SearchQuery) -> Result<AssetPage> {
        let filter = predicate.to_sql();
        let mut conditions = vec![filter.sql];
        let mut values: Vec<Value> = filter.params.into_iter().map(Value::Text).collect();

        if let Some(q) = query.q.as_deref().filter(|q| !q.is_empty()) {
            conditions.push(
                "(unicode_lower(assets.name) LIKE ? ESCAPE '\\' \
                 OR unicode_lower(assets.description) LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            let pattern = like_pattern(q);
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        if !query.tags.is_empty() {
            let placeholders = vec!["?"; query.tags.len()].join(", ");
            conditions.push(format!(
                "assets.id IN (SELECT asset_tags.asset_id FROM asset_tags
                     JOIN tags ON tags.id = asset_tags.tag_id
                     WHERE tags.name IN ({placeholders}))"
            ));
            values.extend(query.tags.iter().cloned().map(Value::Text));
        }

        if let Some(format) = query.format {
            conditions.push("assets.format = ?".to_string());
            values.push(Value::Text(format.as_str().to_string()));
        }

        if let Some(min) = query.min_tris {
            conditions.push("assets.tri_count >= ?".to_string());
            values.push(Value::Integer(min));
        }

        if let Some(max) = query.max_tris {
            conditions.push("assets.tri_count <= ?".to_string());
            values.push(Value::Integer(max));
        }

        if let Some(use_case) = &query.use_case {
            conditions.push("assets.use_case = ?".to_string());
            values.push(Value::Text(use_case.clone()));
        }

        if let Some(level) = query.access_level {
            conditions.push("assets.access_level = ?".to_string());
            values.push(Value::Text(level.as_str().to_string()));
        }

        let where_clause = conditions.join(" AND ");
        let conn = self.conn();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM assets WHERE {where_clause}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let size = query.size.max(1);
        values.push(Value::Integer(i64::from(size)));
        values.push(Value::Integer(
            i64::try_from(query.offset()).unwrap_or(i64::MAX),
        ));

        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE {where_clause}
             ORDER BY assets.created_at DESC, assets.id DESC
             LIMIT ? OFFSET ?"
        ))?;
        let mut items = stmt
            .query_map(params_from_iter(values.iter()), asset_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for asset in &mut items {
            load_tag_names(&conn, asset)?;
        }

        Ok(AssetPage::new(
            items,
            u64::try_from(total).unwrap_or_default(),
            query.page.max(1),
            size,
        ))
    }

    fn update_asset_details(&self, id: &str, actor: &Actor, update: &AssetUpdate) -> Result<Asset> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        authorize(&tx, id, actor, Action::Write)?;

        tx.execute(
            "UPDATE assets
             SET name = COALESCE(?1, name), description = COALESCE(?2, description), updated_at = ?3
             WHERE id = ?4",
            params![
                update.name,
                update.description,
                format_datetime(&Utc::now()),
                id
            ],
        )?;

        let asset = load_asset(&tx, id)?.ok_or_else(|| Error::asset_not_found(id))?;
        tx.commit()?;
        Ok(asset)
    }

    fn delete_asset(&self, id: &str, actor: &Actor) -> Result<Vec<AssetVersion>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        authorize(&tx, id, actor, Action::Delete)?;

        let removed = versions::list(&tx, id)?;
        ledger::release(&tx, id)?;
        tx.execute("DELETE FROM asset_versions WHERE asset_id = ?1", params![id])?;
        tx.execute("DELETE FROM assets WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(removed)
    }

    // Version operations

    fn commit_version(
        &self,
        id: &str,
        expected_version: i64,
        payload: &Payload,
        actor: &Actor,
        changes: Option<&str>,
    ) -> Result<AssetVersion> {
        let created_by = actor_id(actor)?;
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        authorize(&tx, id, actor, Action::Write)?;
        let version = versions::commit_next(
            &tx,
            id,
            expected_version,
            payload,
            created_by,
            changes,
            Utc::now(),
        )?;

        tx.commit()?;
        Ok(version)
    }

    fn list_versions(&self, asset_id: &str) -> Result<Vec<AssetVersion>> {
        versions::list(&self.conn(), asset_id)
    }

    fn get_version(&self, asset_id: &str, version_number: i64) -> Result<Option<AssetVersion>> {
        versions::get(&self.conn(), asset_id, version_number)
    }

    // Tag operations

    fn attach_tags(&self, asset_id: &str, actor: &Actor, names: &[String]) -> Result<Vec<Tag>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        authorize(&tx, asset_id, actor, Action::Write)?;
        let tags = ledger::attach(&tx, asset_id, names, Utc::now())?;

        tx.commit()?;
        Ok(tags)
    }

    fn replace_tags(&self, asset_id: &str, actor: &Actor, names: &[String]) -> Result<Vec<Tag>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        authorize(&tx, asset_id, actor, Action::Write)?;
        let tags = ledger::replace(&tx, asset_id, names, Utc::now())?;

        tx.commit()?;
        Ok(tags)
    }

    fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM tags WHERE tags.name = ?1", ledger::TAG_COLUMNS),
            params![name],
            ledger::tag_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tags(&self, category: Option<TagCategory>) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tags
             WHERE ?1 IS NULL OR tags.category = ?1
             ORDER BY tags.usage_count DESC, tags.name ASC",
            ledger::TAG_COLUMNS
        ))?;

        let rows = stmt.query_map(params![category.map(TagCategory::as_str)], ledger::tag_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn popular_tags(&self, limit: u32) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tags
             WHERE tags.usage_count > 0
             ORDER BY tags.usage_count DESC, tags.name ASC
             LIMIT ?1",
            ledger::TAG_COLUMNS
        ))?;

        let rows = stmt.query_map(params![limit], ledger::tag_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn search_tags(&self, query: &str, limit: u32) -> Result<Vec<Tag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tags
             WHERE unicode_lower(tags.name) LIKE ?1 ESCAPE '\\'
             ORDER BY tags.usage_count DESC, tags.name ASC
             LIMIT ?2",
            ledger::TAG_COLUMNS
        ))?;

        let rows = stmt.query_map(params![like_pattern(query), limit], ledger::tag_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn audit(&self) -> Result<AuditReport> {
        let conn = self.conn();
        Ok(AuditReport {
            tag_drift: ledger::find_drift(&conn)?,
            version_gaps: versions::find_gaps(&conn)?,
            stale_pointers: versions::find_stale_pointers(&conn)?,
            orphaned_versions: versions::count_orphans(&conn)?,
        })
    }

    fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn storage_stats(&self) -> Result<StorageStats> {
        self.conn()
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM assets",
                [],
                |row| {
                    Ok(StorageStats {
                        total_assets: row.get(0)?,
                        total_storage_bytes: row.get(1)?,
                    })
                },
            )
            .map_err(Error::from)
    }
}
