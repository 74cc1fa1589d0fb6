use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccessControl;

/// Supported 3D file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Gltf,
    Glb,
    Usdz,
    Blend,
    Fbx,
    Obj,
    Stl,
    Ply,
}

impl AssetFormat {
    pub const ALL: [AssetFormat; 8] = [
        AssetFormat::Gltf,
        AssetFormat::Glb,
        AssetFormat::Usdz,
        AssetFormat::Blend,
        AssetFormat::Fbx,
        AssetFormat::Obj,
        AssetFormat::Stl,
        AssetFormat::Ply,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gltf => "gltf",
            Self::Glb => "glb",
            Self::Usdz => "usdz",
            Self::Blend => "blend",
            Self::Fbx => "fbx",
            Self::Obj => "obj",
            Self::Stl => "stl",
            Self::Ply => "ply",
        }
    }

    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Gltf => "model/gltf+json",
            Self::Glb => "model/gltf-binary",
            Self::Usdz => "model/vnd.usdz+zip",
            Self::Obj => "model/obj",
            Self::Stl => "model/stl",
            Self::Ply => "application/x-ply",
            Self::Blend | Self::Fbx => "application/octet-stream",
        }
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == lower)
            .ok_or_else(|| format!("unsupported format: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage_id: Option<String>,
    pub name: String,
    pub description: String,
    pub format: AssetFormat,
    pub tri_count: i64,
    pub version: i64,
    pub file_path: String,
    pub file_size: i64,
    pub checksum: String,
    #[serde(flatten)]
    pub access: AccessControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    pub attribution_required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable history record for one version of an asset's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetVersion {
    pub id: String,
    pub asset_id: String,
    pub version_number: i64,
    pub file_path: String,
    pub file_size: i64,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    UseCase,
    Domain,
    Technical,
    Geographic,
    Temporal,
    General,
}

impl TagCategory {
    pub const ALL: [TagCategory; 6] = [
        TagCategory::UseCase,
        TagCategory::Domain,
        TagCategory::Technical,
        TagCategory::Geographic,
        TagCategory::Temporal,
        TagCategory::General,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseCase => "use_case",
            Self::Domain => "domain",
            Self::Technical => "technical",
            Self::Geographic => "geographic",
            Self::Temporal => "temporal",
            Self::General => "general",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UseCase => "Project use case identifiers",
            Self::Domain => "Scientific or subject domain",
            Self::Technical => "Technical characteristics of the asset",
            Self::Geographic => "Geographic location or region",
            Self::Temporal => "Time period or release marker",
            Self::General => "Uncategorized tags",
        }
    }

    #[must_use]
    pub const fn examples(self) -> &'static [&'static str] {
        match self {
            Self::UseCase => &["UC2", "UC3", "UC4", "UC5"],
            Self::Domain => &["molecule", "admet", "cancer", "protein"],
            Self::Technical => &["lowpoly", "lod", "mobile", "xr"],
            Self::Geographic => &["helsinki", "brno", "barcelona"],
            Self::Temporal => &["2025q1", "latest2025"],
            Self::General => &["draft", "showcase"],
        }
    }
}

impl fmt::Display for TagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown tag category: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub category: TagCategory,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Location and fingerprint of an uploaded payload in blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub file_path: String,
    pub file_size: i64,
    pub checksum: String,
}

/// Everything needed to insert a new asset; the store fills in version 1.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub id: String,
    pub lineage_id: Option<String>,
    pub name: String,
    pub description: String,
    pub format: AssetFormat,
    pub tri_count: i64,
    pub access: AccessControl,
    pub use_case: Option<String>,
    pub license: Option<String>,
    pub attribution_required: bool,
    pub derived_from: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 20;
pub const MAX_SEARCH_PAGE_SIZE: u32 = 100;

/// Caller-specified filters for the bulk asset query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub tags: Vec<String>,
    pub format: Option<AssetFormat>,
    pub min_tris: Option<i64>,
    pub max_tris: Option<i64>,
    pub use_case: Option<String>,
    pub access_level: Option<super::AccessLevel>,
    pub page: u32,
    pub size: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            q: None,
            tags: Vec::new(),
            format: None,
            min_tris: None,
            max_tris: None,
            use_case: None,
            access_level: None,
            page: 1,
            size: DEFAULT_SEARCH_PAGE_SIZE,
        }
    }
}

impl SearchQuery {
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetPage {
    pub items: Vec<Asset>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

impl AssetPage {
    #[must_use]
    pub fn new(items: Vec<Asset>, total: u64, page: u32, size: u32) -> Self {
        let pages = if total == 0 {
            1
        } else {
            total.div_ceil(u64::from(size.max(1)))
        };
        Self {
            items,
            total,
            page,
            size,
            pages,
        }
    }
}
