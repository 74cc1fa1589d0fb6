//! Tag ledger: shared tags and their denormalized usage counters.
//!
//! A tag's `usage_count` equals the number of assets currently linked to it.
//! Every function that changes links adjusts counters in the same
//! caller-owned transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{TagDrift, format_datetime, parse_datetime};
use crate::error::{Error, Result};
use crate::types::{Tag, TagCategory};

/// Most tags a single asset may carry.
pub const MAX_TAGS: usize = 20;

const DOMAIN_KEYWORDS: &[&str] = &["molecule", "admet", "aq", "cancer", "dopamine", "cell", "protein"];
const TECHNICAL_KEYWORDS: &[&str] = &["lowpoly", "lod", "mobile", "xr", "vr", "ar", "optimized"];
const GEOGRAPHIC_KEYWORDS: &[&str] = &["helsinki", "brno", "barcelona", "munich", "finland", "germany"];
const TEMPORAL_MARKERS: &[&str] = &["q1", "q2", "q3", "q4", "latest"];

// Keywords this short only count as a whole alphabetic word, so "barcelona"
// is not technical because it contains "ar".
const SHORT_KEYWORD_LEN: usize = 3;

/// Assigns a category to a tag name the first time it is seen.
#[must_use]
pub fn classify(name: &str) -> TagCategory {
    let lower = name.trim().to_lowercase();

    if lower
        .strip_prefix("uc")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    {
        return TagCategory::UseCase;
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let has_keyword = |keywords: &[&str]| {
        keywords.iter().any(|kw| {
            if kw.len() <= SHORT_KEYWORD_LEN {
                words.contains(kw)
            } else {
                lower.contains(kw)
            }
        })
    };

    if has_keyword(DOMAIN_KEYWORDS) {
        TagCategory::Domain
    } else if has_keyword(TECHNICAL_KEYWORDS) {
        TagCategory::Technical
    } else if has_keyword(GEOGRAPHIC_KEYWORDS) {
        TagCategory::Geographic
    } else if lower.chars().any(|c| c.is_ascii_digit())
        && TEMPORAL_MARKERS.iter().any(|m| lower.contains(m))
    {
        TagCategory::Temporal
    } else {
        TagCategory::General
    }
}

pub(crate) const TAG_COLUMNS: &str = "tags.id, tags.name, tags.category, tags.usage_count, tags.created_at";

pub(crate) fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
    let category: String = row.get(2)?;
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        category: category.parse().unwrap_or_else(|e| {
            tracing::warn!("{e}; treating as general");
            TagCategory::General
        }),
        usage_count: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// Finds or creates a tag for each distinct name, preserving first-seen order.
pub(crate) fn resolve(conn: &Connection, names: &[String], now: DateTime<Utc>) -> Result<Vec<Tag>> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for name in names {
        if !seen.insert(name.as_str()) {
            continue;
        }

        let existing = conn
            .query_row(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE tags.name = ?1"),
                params![name],
                tag_from_row,
            )
            .optional()?;

        let tag = match existing {
            Some(tag) => tag,
            None => {
                let tag = Tag {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.clone(),
                    category: classify(name),
                    usage_count: 0,
                    created_at: now,
                };
                conn.execute(
                    "INSERT INTO tags (id, name, category, usage_count, created_at)
                     VALUES (?1, ?2, ?3, 0, ?4)",
                    params![tag.id, tag.name, tag.category.as_str(), format_datetime(&now)],
                )?;
                tag
            }
        };
        tags.push(tag);
    }

    Ok(tags)
}

/// Links every named tag to the asset. Tags already linked are left alone,
/// so each distinct newly linked tag is counted exactly once. Fails without
/// linking anything if the asset would end up with more than [`MAX_TAGS`].
pub(crate) fn attach(
    conn: &Connection,
    asset_id: &str,
    names: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<Tag>> {
    let linked: HashSet<String> = for_asset(conn, asset_id)?
        .into_iter()
        .map(|tag| tag.name)
        .collect();
    let added: HashSet<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| !linked.contains(*name))
        .collect();
    if linked.len() + added.len() > MAX_TAGS {
        return Err(Error::BadRequest(format!(
            "Maximum {MAX_TAGS} tags allowed"
        )));
    }

    for tag in resolve(conn, names, now)? {
        link(conn, asset_id, &tag)?;
    }
    for_asset(conn, asset_id)
}

/// Makes the asset's tag set exactly `names`, adjusting counters only for the
/// symmetric difference between the old and new sets.
pub(crate) fn replace(
    conn: &Connection,
    asset_id: &str,
    names: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<Tag>> {
    let wanted = resolve(conn, names, now)?;
    let wanted_ids: HashSet<&str> = wanted.iter().map(|t| t.id.as_str()).collect();

    for tag in for_asset(conn, asset_id)? {
        if !wanted_ids.contains(tag.id.as_str()) {
            unlink(conn, asset_id, &tag)?;
        }
    }
    for tag in &wanted {
        link(conn, asset_id, tag)?;
    }

    for_asset(conn, asset_id)
}

/// Drops every link of an asset that is about to be deleted.
pub(crate) fn release(conn: &Connection, asset_id: &str) -> Result<()> {
    for tag in for_asset(conn, asset_id)? {
        unlink(conn, asset_id, &tag)?;
    }
    Ok(())
}

pub(crate) fn for_asset(conn: &Connection, asset_id: &str) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TAG_COLUMNS} FROM tags
         JOIN asset_tags ON asset_tags.tag_id = tags.id
         WHERE asset_tags.asset_id = ?1
         ORDER BY tags.name"
    ))?;

    let rows = stmt.query_map(params![asset_id], tag_from_row)?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn link(conn: &Connection, asset_id: &str, tag: &Tag) -> Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO asset_tags (asset_id, tag_id) VALUES (?1, ?2)",
        params![asset_id, tag.id],
    )?;
    if inserted > 0 {
        conn.execute(
            "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
            params![tag.id],
        )?;
    }
    Ok(())
}

fn unlink(conn: &Connection, asset_id: &str, tag: &Tag) -> Result<()> {
    let removed = conn.execute(
        "DELETE FROM asset_tags WHERE asset_id = ?1 AND tag_id = ?2",
        params![asset_id, tag.id],
    )?;
    if removed == 0 {
        return Ok(());
    }

    let current: i64 = conn.query_row(
        "SELECT usage_count FROM tags WHERE id = ?1",
        params![tag.id],
        |row| row.get(0),
    )?;
    if current <= 0 {
        tracing::error!(
            tag = %tag.name,
            asset_id,
            "tag usage count would drop below zero; leaving it at zero"
        );
        return Ok(());
    }

    conn.execute(
        "UPDATE tags SET usage_count = usage_count - 1 WHERE id = ?1",
        params![tag.id],
    )?;
    Ok(())
}

/// Tags whose recorded counter differs from the number of linked assets.
pub(crate) fn find_drift(conn: &Connection) -> Result<Vec<TagDrift>> {
    let mut stmt = conn.prepare(
        "SELECT t.name, t.usage_count, COUNT(at.asset_id)
         FROM tags t
         LEFT JOIN asset_tags at ON at.tag_id = t.id
         GROUP BY t.id, t.name, t.usage_count
         HAVING t.usage_count != COUNT(at.asset_id)
         ORDER BY t.name",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(TagDrift {
            tag: row.get(0)?,
            recorded: row.get(1)?,
            actual: row.get(2)?,
        })
    })?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}
