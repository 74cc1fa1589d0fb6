//! Best-effort geometry and material facts from uploaded model files.
//!
//! Extraction never blocks asset creation: callers log failures and carry on
//! without metadata.

mod geometry;

pub use geometry::GeometryExtractor;

use serde::Serialize;
use thiserror::Error;

use crate::types::AssetFormat;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("metadata extraction is not supported for {0} files")]
    Unsupported(AssetFormat),
    #[error("malformed {format} file: {reason}")]
    Malformed { format: AssetFormat, reason: String },
}

impl ExtractError {
    pub(crate) fn malformed(format: AssetFormat, reason: impl Into<String>) -> Self {
        Self::Malformed {
            format,
            reason: reason.into(),
        }
    }
}

/// Contract for anything that can inspect raw payload bytes.
pub trait MetadataExtractor: Send + Sync + 'static {
    fn extract(&self, format: AssetFormat, data: &[u8]) -> Result<GeometryReport, ExtractError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub(crate) fn around(p: [f64; 3]) -> Self {
        let point = Point {
            x: p[0],
            y: p[1],
            z: p[2],
        };
        Self {
            min: point,
            max: point,
        }
    }

    pub(crate) fn include(&mut self, p: [f64; 3]) {
        self.min.x = self.min.x.min(p[0]);
        self.min.y = self.min.y.min(p[1]);
        self.min.z = self.min.z.min(p[2]);
        self.max.x = self.max.x.max(p[0]);
        self.max.y = self.max.y.max(p[1]);
        self.max.z = self.max.z.max(p[2]);
    }

    pub(crate) fn merge(&mut self, other: &BoundingBox) {
        self.include([other.min.x, other.min.y, other.min.z]);
        self.include([other.max.x, other.max.y, other.max.z]);
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.max.x - self.min.x,
            height: self.max.y - self.min.y,
            depth: self.max.z - self.min.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

/// Facts found in a model file. Absent fields were not determinable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeometryReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tri_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_count: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub material_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_count: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub animation_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gltf_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    /// Structured metadata an exporter embedded in the scene extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded: Option<serde_json::Value>,
}

impl GeometryReport {
    pub(crate) fn set_bounds(&mut self, bounds: Option<BoundingBox>) {
        self.dimensions = bounds.as_ref().map(BoundingBox::dimensions);
        self.bounding_box = bounds;
    }
}
