use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::response::ApiError;
use crate::registry::CreateAsset;
use crate::types::{AccessLevel, AssetFormat, DEFAULT_SEARCH_PAGE_SIZE, SearchQuery, TagCategory};

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    /// Comma-separated; an asset matches if it has any of them.
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, alias = "minTris")]
    pub min_tris: Option<i64>,
    #[serde(default, alias = "maxTris")]
    pub max_tris: Option<i64>,
    #[serde(default, alias = "useCase")]
    pub use_case: Option<String>,
    #[serde(default, alias = "accessLevel")]
    pub access_level: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
}

impl SearchParams {
    pub fn into_query(self) -> Result<SearchQuery, ApiError> {
        Ok(SearchQuery {
            q: self.q.filter(|q| !q.trim().is_empty()),
            tags: self.tags.as_deref().map(split_list).unwrap_or_default(),
            format: self.format.as_deref().map(parse_format).transpose()?,
            min_tris: self.min_tris,
            max_tris: self.max_tris,
            use_case: self.use_case.filter(|u| !u.is_empty()),
            access_level: self
                .access_level
                .as_deref()
                .map(parse_access_level)
                .transpose()?,
            page: self.page.unwrap_or(1),
            size: self.size.unwrap_or(DEFAULT_SEARCH_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagListParams {
    #[serde(default)]
    pub category: Option<String>,
}

impl TagListParams {
    pub fn category(&self) -> Result<Option<TagCategory>, ApiError> {
        self.category
            .as_deref()
            .map(|c| c.parse().map_err(ApiError::bad_request))
            .transpose()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PopularParams {
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagSearchParams {
    #[serde(default)]
    pub q: String,
}

/// Text fields of a multipart asset upload, collected before the request is
/// built.
#[derive(Debug, Default)]
pub struct AssetFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub format: Option<String>,
    pub tri_count: Option<String>,
    pub tags: Option<String>,
    pub use_case: Option<String>,
    pub access_level: Option<String>,
    pub authorized_users: Option<String>,
    pub authorized_institutions: Option<String>,
    pub embargo_until: Option<String>,
    pub license: Option<String>,
    pub attribution_required: Option<String>,
    pub lineage_id: Option<String>,
    pub derived_from: Option<String>,
    pub auto_extract: Option<String>,
}

impl AssetFields {
    /// Records a text field. Returns false for names this form does not know.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "name" => &mut self.name,
            "description" => &mut self.description,
            "format" => &mut self.format,
            "tri_count" | "triCount" => &mut self.tri_count,
            "tags" => &mut self.tags,
            "use_case" | "useCase" => &mut self.use_case,
            "access_level" | "accessLevel" => &mut self.access_level,
            "authorized_users" | "authorizedUsers" => &mut self.authorized_users,
            "authorized_institutions" | "authorizedInstitutions" => {
                &mut self.authorized_institutions
            }
            "embargo_until" | "embargoUntil" => &mut self.embargo_until,
            "license" => &mut self.license,
            "attribution_required" | "attributionRequired" => &mut self.attribution_required,
            "lineage_id" | "lineageId" => &mut self.lineage_id,
            "derived_from" | "derivedFrom" => &mut self.derived_from,
            "auto_extract" | "autoExtract" => &mut self.auto_extract,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// Builds the create request. The format falls back to the uploaded file's
    /// extension and the name to its stem.
    pub fn into_request(self, file_name: Option<&str>) -> Result<CreateAsset, ApiError> {
        let (stem, extension) = match file_name.and_then(|f| f.rsplit_once('.')) {
            Some((stem, ext)) => (Some(stem), Some(ext)),
            None => (file_name, None),
        };

        let format = self
            .format
            .as_deref()
            .or(extension)
            .ok_or_else(|| ApiError::bad_request("File format is required"))
            .and_then(parse_format)?;

        let name = self
            .name
            .or_else(|| stem.map(str::to_string))
            .ok_or_else(|| ApiError::bad_request("Asset name is required"))?;

        let mut request = CreateAsset::new(name, format);
        request.description = self.description.unwrap_or_default();
        request.tri_count = self
            .tri_count
            .as_deref()
            .map(|t| {
                t.trim()
                    .parse::<i64>()
                    .map_err(|_| ApiError::bad_request(format!("Invalid triangle count: {t}")))
            })
            .transpose()?;
        request.tags = self.tags.as_deref().map(parse_list).unwrap_or_default();
        request.use_case = non_empty(self.use_case);
        if let Some(level) = self.access_level.as_deref() {
            request.access_level = parse_access_level(level)?;
        }
        request.authorized_users = self
            .authorized_users
            .as_deref()
            .map(parse_list)
            .unwrap_or_default();
        request.authorized_institutions = self
            .authorized_institutions
            .as_deref()
            .map(parse_list)
            .unwrap_or_default();
        request.embargo_until = non_empty(self.embargo_until)
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        request.license = non_empty(self.license);
        if let Some(value) = self.attribution_required.as_deref() {
            request.attribution_required = parse_bool(value)?;
        }
        request.lineage_id = non_empty(self.lineage_id);
        request.derived_from = self
            .derived_from
            .as_deref()
            .map(parse_list)
            .unwrap_or_default();
        if let Some(value) = self.auto_extract.as_deref() {
            request.auto_extract = parse_bool(value)?;
        }

        Ok(request)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts either a JSON array of strings or a comma-separated list.
fn parse_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list;
        }
    }
    split_list(trimmed)
}

fn parse_bool(value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::bad_request(format!("Invalid boolean: {other}"))),
    }
}

fn parse_format(value: &str) -> Result<AssetFormat, ApiError> {
    value.trim().parse().map_err(ApiError::bad_request)
}

fn parse_access_level(value: &str) -> Result<AccessLevel, ApiError> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(ApiError::bad_request)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::bad_request(format!("Invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params() {
        let params = SearchParams {
            tags: Some("UC2, molecule,".to_string()),
            format: Some("GLB".to_string()),
            access_level: Some("public".to_string()),
            ..SearchParams::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.tags, vec!["UC2", "molecule"]);
        assert_eq!(query.format, Some(AssetFormat::Glb));
        assert_eq!(query.access_level, Some(AccessLevel::Public));
        assert_eq!((query.page, query.size), (1, DEFAULT_SEARCH_PAGE_SIZE));

        let bad = SearchParams {
            format: Some("dwg".to_string()),
            ..SearchParams::default()
        };
        assert!(bad.into_query().is_err());
    }

    #[test]
    fn test_fields_fall_back_to_file_name() {
        let mut fields = AssetFields::default();
        assert!(fields.set("tags", r#"["UC2", "helsinki"]"#.to_string()));
        assert!(fields.set("accessLevel", "INSTITUTION".to_string()));
        assert!(fields.set("embargoUntil", "2030-01-01T00:00:00Z".to_string()));
        assert!(!fields.set("unknown", String::new()));

        let request = fields.into_request(Some("ring.glb")).unwrap();
        assert_eq!(request.name, "ring");
        assert_eq!(request.format, AssetFormat::Glb);
        assert_eq!(request.tags, vec!["UC2", "helsinki"]);
        assert_eq!(request.access_level, AccessLevel::Institution);
        assert!(request.embargo_until.is_some());
        assert!(request.auto_extract);
    }

    #[test]
    fn test_fields_require_format() {
        let mut fields = AssetFields::default();
        fields.set("name", "Ring".to_string());
        assert!(fields.into_request(Some("ring")).is_err());

        let mut fields = AssetFields::default();
        fields.set("triCount", "many".to_string());
        assert!(fields.into_request(Some("ring.stl")).is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("Yes").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
