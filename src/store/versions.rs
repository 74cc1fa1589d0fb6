//! Version history of asset payloads.
//!
//! These functions run inside a caller-owned transaction. Versions are
//! numbered `1..=asset.version` without gaps, and the asset's current file
//! pointer always mirrors the highest-numbered version row.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{VersionGap, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{AssetVersion, Payload};

/// Change note recorded for the first version of every asset.
pub const INITIAL_CHANGES: &str = "Initial version";

const VERSION_COLUMNS: &str =
    "id, asset_id, version_number, file_path, file_size, checksum, changes, created_by, created_at";

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetVersion> {
    Ok(AssetVersion {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        version_number: row.get(2)?,
        file_path: row.get(3)?,
        file_size: row.get(4)?,
        checksum: row.get(5)?,
        changes: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

/// Records version 1 for a freshly inserted asset.
pub(crate) fn record_initial(
    conn: &Connection,
    asset_id: &str,
    payload: &Payload,
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<AssetVersion> {
    insert(conn, asset_id, 1, payload, created_by, Some(INITIAL_CHANGES), now)
}

/// Advances the asset from `expected_version` to `expected_version + 1`,
/// moving its file pointer to `payload` and appending the history row.
///
/// The pointer update only applies if the asset is still at
/// `expected_version`; otherwise another writer got there first and the
/// caller receives [`Error::Conflict`].
pub(crate) fn commit_next(
    conn: &Connection,
    asset_id: &str,
    expected_version: i64,
    payload: &Payload,
    created_by: &str,
    changes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AssetVersion> {
    let next = expected_version + 1;

    let rows = conn.execute(
        "UPDATE assets
         SET version = ?1, file_path = ?2, file_size = ?3, checksum = ?4, updated_at = ?5
         WHERE id = ?6 AND version = ?7",
        params![
            next,
            payload.file_path,
            payload.file_size,
            payload.checksum,
            format_datetime(&now),
            asset_id,
            expected_version,
        ],
    )?;

    if rows == 0 {
        let current: Option<i64> = conn
            .query_row(
                "SELECT version FROM assets WHERE id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .optional()?;

        return Err(match current {
            None => Error::asset_not_found(asset_id),
            Some(current) => Error::Conflict(format!(
                "asset '{asset_id}' is at version {current}, expected {expected_version}"
            )),
        });
    }

    let default_changes = format!("Version {next}");
    let changes = changes.unwrap_or(&default_changes);
    insert(conn, asset_id, next, payload, created_by, Some(changes), now)
}

fn insert(
    conn: &Connection,
    asset_id: &str,
    version_number: i64,
    payload: &Payload,
    created_by: &str,
    changes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AssetVersion> {
    let version = AssetVersion {
        id: uuid::Uuid::new_v4().to_string(),
        asset_id: asset_id.to_string(),
        version_number,
        file_path: payload.file_path.clone(),
        file_size: payload.file_size,
        checksum: payload.checksum.clone(),
        changes: changes.map(str::to_string),
        created_by: created_by.to_string(),
        created_at: now,
    };

    let result = conn.execute(
        "INSERT INTO asset_versions
         (id, asset_id, version_number, file_path, file_size, checksum, changes, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            version.id,
            version.asset_id,
            version.version_number,
            version.file_path,
            version.file_size,
            version.checksum,
            version.changes,
            version.created_by,
            format_datetime(&version.created_at),
        ],
    );

    match result {
        Ok(_) => Ok(version),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::Conflict(format!(
                "version {version_number} of asset '{asset_id}' already exists"
            )))
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// All versions of an asset, newest first.
pub(crate) fn list(conn: &Connection, asset_id: &str) -> Result<Vec<AssetVersion>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM asset_versions
         WHERE asset_id = ?1 ORDER BY version_number DESC"
    ))?;

    let rows = stmt.query_map(params![asset_id], version_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub(crate) fn get(
    conn: &Connection,
    asset_id: &str,
    version_number: i64,
) -> Result<Option<AssetVersion>> {
    conn.query_row(
        &format!(
            "SELECT {VERSION_COLUMNS} FROM asset_versions
             WHERE asset_id = ?1 AND version_number = ?2"
        ),
        params![asset_id, version_number],
        version_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Assets whose history is not exactly `1..=version`.
pub(crate) fn find_gaps(conn: &Connection) -> Result<Vec<VersionGap>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.version, COUNT(v.id), MIN(v.version_number), MAX(v.version_number)
         FROM assets a
         LEFT JOIN asset_versions v ON v.asset_id = a.id
         GROUP BY a.id, a.version
         HAVING COUNT(v.id) != a.version
             OR MIN(v.version_number) IS NOT 1
             OR MAX(v.version_number) IS NOT a.version
         ORDER BY a.id",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(VersionGap {
            asset_id: row.get(0)?,
            version: row.get(1)?,
            rows: row.get(2)?,
            lowest: row.get(3)?,
            highest: row.get(4)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Assets whose file pointer differs from their highest version row.
pub(crate) fn find_stale_pointers(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT a.id FROM assets a
         LEFT JOIN asset_versions v
             ON v.asset_id = a.id AND v.version_number = a.version
         WHERE v.id IS NULL
             OR v.file_path != a.file_path
             OR v.file_size != a.file_size
             OR v.checksum != a.checksum
         ORDER BY a.id",
    )?;

    let rows = stmt.query_map([], |row| row.get(0))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

pub(crate) fn count_orphans(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM asset_versions v
         WHERE NOT EXISTS (SELECT 1 FROM assets a WHERE a.id = v.asset_id)",
        [],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::SCHEMA;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO assets (id, name, format, file_path, file_size, checksum,
                                 owner_id, owner_institution, created_at, updated_at)
             VALUES ('a1', 'ring', 'stl', 'assets/a1/v1/ring.stl', 10, 'c1', 'alice', 'X', '', '')",
            [],
        )
        .unwrap();
        conn
    }

    fn payload(version: i64) -> Payload {
        Payload {
            file_path: format!("assets/a1/v{version}/ring.stl"),
            file_size: 10 * version,
            checksum: format!("c{version}"),
        }
    }

    #[test]
    fn test_history_is_gapless() {
        let conn = setup();
        let now = Utc::now();

        let first = record_initial(&conn, "a1", &payload(1), "alice", now).unwrap();
        assert_eq!(first.version_number, 1);
        assert_eq!(first.changes.as_deref(), Some(INITIAL_CHANGES));

        let second = commit_next(&conn, "a1", 1, &payload(2), "alice", None, now).unwrap();
        assert_eq!(second.version_number, 2);
        assert_eq!(second.changes.as_deref(), Some("Version 2"));

        let third =
            commit_next(&conn, "a1", 2, &payload(3), "alice", Some("retopology"), now).unwrap();
        assert_eq!(third.changes.as_deref(), Some("retopology"));

        let numbers: Vec<i64> = list(&conn, "a1")
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        assert!(find_gaps(&conn).unwrap().is_empty());
        assert!(find_stale_pointers(&conn).unwrap().is_empty());
        assert_eq!(count_orphans(&conn).unwrap(), 0);
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let conn = setup();
        let now = Utc::now();
        record_initial(&conn, "a1", &payload(1), "alice", now).unwrap();
        commit_next(&conn, "a1", 1, &payload(2), "alice", None, now).unwrap();

        let err = commit_next(&conn, "a1", 1, &payload(2), "bob", None, now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {err}");

        let err = commit_next(&conn, "missing", 1, &payload(2), "bob", None, now).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "got {err}");
    }

    #[test]
    fn test_audit_detects_gap_and_stale_pointer() {
        let conn = setup();
        record_initial(&conn, "a1", &payload(1), "alice", Utc::now()).unwrap();

        conn.execute("UPDATE assets SET version = 2 WHERE id = 'a1'", [])
            .unwrap();

        let gaps = find_gaps(&conn).unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].asset_id, "a1");
        assert_eq!(gaps[0].rows, 1);
        assert_eq!(find_stale_pointers(&conn).unwrap(), vec!["a1".to_string()]);
    }
}
