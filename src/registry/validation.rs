use crate::error::{Error, Result};
pub use crate::store::ledger::MAX_TAGS;
use crate::types::{MAX_SEARCH_PAGE_SIZE, SearchQuery};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_TRI_COUNT: i64 = 10_000_000;

fn validate_text(value: &str, field: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min {
        return Err(Error::BadRequest(format!("{field} cannot be empty")));
    }
    if len > max {
        return Err(Error::BadRequest(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

pub fn validate_asset_name(name: &str) -> Result<()> {
    validate_text(name.trim(), "Asset name", 1, MAX_NAME_LEN)
}

pub fn validate_description(description: &str) -> Result<()> {
    validate_text(description, "Description", 0, MAX_DESCRIPTION_LEN)
}

pub fn validate_tri_count(tri_count: i64) -> Result<()> {
    if !(0..=MAX_TRI_COUNT).contains(&tri_count) {
        return Err(Error::BadRequest(format!(
            "Triangle count must be between 0 and {MAX_TRI_COUNT}"
        )));
    }
    Ok(())
}

/// Trims tag names and drops empty ones, then enforces count and length
/// limits. Duplicates are left for the ledger to collapse.
pub fn normalize_tags(names: &[String]) -> Result<Vec<String>> {
    let tags: Vec<String> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if tags.len() > MAX_TAGS {
        return Err(Error::BadRequest(format!(
            "Maximum {MAX_TAGS} tags allowed"
        )));
    }
    for tag in &tags {
        validate_text(tag, "Tag name", 1, MAX_TAG_LEN)?;
    }

    Ok(tags)
}

pub fn validate_search(query: &SearchQuery) -> Result<()> {
    if query.page < 1 {
        return Err(Error::BadRequest("Page must be at least 1".to_string()));
    }
    if query.size < 1 || query.size > MAX_SEARCH_PAGE_SIZE {
        return Err(Error::BadRequest(format!(
            "Page size must be between 1 and {MAX_SEARCH_PAGE_SIZE}"
        )));
    }
    if let (Some(min), Some(max)) = (query.min_tris, query.max_tris) {
        if min > max {
            return Err(Error::BadRequest(
                "minTris cannot exceed maxTris".to_string(),
            ));
        }
    }
    Ok(())
}
