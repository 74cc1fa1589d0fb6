use serde_json::Value;

use super::{BoundingBox, ExtractError, GeometryReport, MetadataExtractor};
use crate::types::AssetFormat;

const NAME_LIMIT: usize = 10;

const STL_HEADER_LEN: usize = 80;
const STL_FACET_LEN: usize = 50;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const GLB_JSON_CHUNK: u32 = 0x4E4F_534A; // "JSON"
const GLB_HEADER_LEN: usize = 12;

// glTF primitive modes
const MODE_TRIANGLES: i64 = 4;
const MODE_TRIANGLE_STRIP: i64 = 5;
const MODE_TRIANGLE_FAN: i64 = 6;

/// Key under which exporters embed structured metadata in glTF scene extras.
const EMBEDDED_METADATA_KEY: &str = "metro_metadata";

/// Parses STL, OBJ, PLY headers and glTF/GLB documents without external
/// tooling. USDZ, Blend and FBX payloads are reported as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeometryExtractor;

impl MetadataExtractor for GeometryExtractor {
    fn extract(&self, format: AssetFormat, data: &[u8]) -> Result<GeometryReport, ExtractError> {
        match format {
            AssetFormat::Stl => stl(data),
            AssetFormat::Obj => Ok(obj(data)),
            AssetFormat::Ply => ply(data),
            AssetFormat::Gltf => {
                let doc: Value = serde_json::from_slice(data)
                    .map_err(|e| ExtractError::malformed(format, e.to_string()))?;
                Ok(gltf(&doc))
            }
            AssetFormat::Glb => glb(data),
            AssetFormat::Usdz | AssetFormat::Blend | AssetFormat::Fbx => {
                Err(ExtractError::Unsupported(format))
            }
        }
    }
}

fn parse_point<'a>(mut fields: impl Iterator<Item = &'a str>) -> Option<[f64; 3]> {
    let x = fields.next()?.parse().ok()?;
    let y = fields.next()?.parse().ok()?;
    let z = fields.next()?.parse().ok()?;
    Some([x, y, z])
}

fn include(bounds: &mut Option<BoundingBox>, p: [f64; 3]) {
    match bounds {
        Some(b) => b.include(p),
        None => *bounds = Some(BoundingBox::around(p)),
    }
}

fn stl(data: &[u8]) -> Result<GeometryReport, ExtractError> {
    if let Some(count) = binary_stl_facets(data) {
        return Ok(binary_stl(data, count));
    }
    if data.starts_with(b"solid") {
        return Ok(ascii_stl(data));
    }
    Err(ExtractError::malformed(
        AssetFormat::Stl,
        "length does not match facet count and no ASCII header",
    ))
}

/// Facet count if `data` is exactly the size a binary STL claims to be.
fn binary_stl_facets(data: &[u8]) -> Option<usize> {
    let count_bytes: [u8; 4] = data
        .get(STL_HEADER_LEN..STL_HEADER_LEN + 4)?
        .try_into()
        .ok()?;
    let count = u32::from_le_bytes(count_bytes) as usize;
    let expected = count
        .checked_mul(STL_FACET_LEN)?
        .checked_add(STL_HEADER_LEN + 4)?;
    (expected == data.len()).then_some(count)
}

fn binary_stl(data: &[u8], count: usize) -> GeometryReport {
    let read = |b: &[u8], at: usize| f64::from(f32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]));

    let mut bounds = None;
    for facet in data[STL_HEADER_LEN + 4..].chunks_exact(STL_FACET_LEN) {
        // 12 bytes of normal, then three vertices
        for offset in [12, 24, 36] {
            include(
                &mut bounds,
                [read(facet, offset), read(facet, offset + 4), read(facet, offset + 8)],
            );
        }
    }

    let mut report = GeometryReport {
        tri_count: Some(count as i64),
        vertex_count: Some(count as i64 * 3),
        mesh_count: Some(1),
        ..GeometryReport::default()
    };
    report.set_bounds(bounds);
    report
}

fn ascii_stl(data: &[u8]) -> GeometryReport {
    let text = String::from_utf8_lossy(data);
    let mut tris = 0;
    let mut vertices = 0;
    let mut solids = 0;
    let mut bounds = None;

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("solid") => solids += 1,
            Some("facet") => tris += 1,
            Some("vertex") => {
                if let Some(p) = parse_point(fields) {
                    include(&mut bounds, p);
                    vertices += 1;
                }
            }
            _ => {}
        }
    }

    let mut report = GeometryReport {
        tri_count: Some(tris),
        vertex_count: Some(vertices),
        mesh_count: Some(solids),
        ..GeometryReport::default()
    };
    report.set_bounds(bounds);
    report
}

fn obj(data: &[u8]) -> GeometryReport {
    let text = String::from_utf8_lossy(data);
    let mut tris = 0;
    let mut vertices = 0;
    let mut objects = 0;
    let mut materials: Vec<String> = Vec::new();
    let mut bounds = None;

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("v") => {
                if let Some(p) = parse_point(fields) {
                    include(&mut bounds, p);
                    vertices += 1;
                }
            }
            Some("f") => {
                let corners = fields.count() as i64;
                if corners >= 3 {
                    tris += corners - 2;
                }
            }
            Some("o") => objects += 1,
            Some("usemtl") => {
                if let Some(name) = fields.next() {
                    if !materials.iter().any(|m| m == name) {
                        materials.push(name.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let mut report = GeometryReport {
        tri_count: Some(tris),
        vertex_count: Some(vertices),
        mesh_count: Some(if objects == 0 && tris > 0 { 1 } else { objects }),
        material_count: (!materials.is_empty()).then_some(materials.len() as i64),
        material_names: materials.into_iter().take(NAME_LIMIT).collect(),
        ..GeometryReport::default()
    };
    report.set_bounds(bounds);
    report
}

/// Reads element counts from the PLY header. Faces are reported as
/// triangles.
fn ply(data: &[u8]) -> Result<GeometryReport, ExtractError> {
    let malformed = |reason: &str| ExtractError::malformed(AssetFormat::Ply, reason);

    if !data.starts_with(b"ply") {
        return Err(malformed("missing 'ply' magic"));
    }

    let text = String::from_utf8_lossy(data);
    let mut report = GeometryReport {
        mesh_count: Some(1),
        ..GeometryReport::default()
    };

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some("element"), Some("vertex"), Some(n)) => {
                report.vertex_count = Some(n.parse().map_err(|_| malformed("bad vertex count"))?);
            }
            (Some("element"), Some("face"), Some(n)) => {
                report.tri_count = Some(n.parse().map_err(|_| malformed("bad face count"))?);
            }
            (Some("end_header"), _, _) => return Ok(report),
            _ => {}
        }
    }

    Err(malformed("header is not terminated"))
}

fn glb(data: &[u8]) -> Result<GeometryReport, ExtractError> {
    let malformed = |reason: &str| ExtractError::malformed(AssetFormat::Glb, reason);
    let word = |at: usize| -> Option<u32> {
        data.get(at..at + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    };

    if word(0) != Some(GLB_MAGIC) {
        return Err(malformed("missing glTF magic"));
    }
    let total = word(8).ok_or_else(|| malformed("truncated header"))? as usize;
    if total > data.len() {
        return Err(malformed("declared length exceeds payload"));
    }

    let chunk_len = word(GLB_HEADER_LEN).ok_or_else(|| malformed("missing JSON chunk"))? as usize;
    if word(GLB_HEADER_LEN + 4) != Some(GLB_JSON_CHUNK) {
        return Err(malformed("first chunk is not JSON"));
    }

    let start = GLB_HEADER_LEN + 8;
    let json = data
        .get(start..start + chunk_len)
        .ok_or_else(|| malformed("JSON chunk is truncated"))?;
    let doc: Value = serde_json::from_slice(json)
        .map_err(|e| ExtractError::malformed(AssetFormat::Glb, e.to_string()))?;

    Ok(gltf(&doc))
}

fn list<'a>(doc: &'a Value, key: &str) -> &'a [Value] {
    doc.get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn accessor<'a>(doc: &'a Value, index: Option<&Value>) -> Option<&'a Value> {
    let index = usize::try_from(index?.as_u64()?).ok()?;
    list(doc, "accessors").get(index)
}

fn vec3(value: Option<&Value>) -> Option<[f64; 3]> {
    let arr = value?.as_array()?;
    Some([arr.first()?.as_f64()?, arr.get(1)?.as_f64()?, arr.get(2)?.as_f64()?])
}

fn gltf(doc: &Value) -> GeometryReport {
    let count = |key: &str| Some(list(doc, key).len() as i64).filter(|n| *n > 0);
    let names = |key: &str| -> Vec<String> {
        list(doc, key)
            .iter()
            .filter_map(|item| item.get("name").and_then(Value::as_str))
            .take(NAME_LIMIT)
            .map(str::to_string)
            .collect()
    };

    let mut tris = 0;
    let mut vertices = 0;
    let mut bounds: Option<BoundingBox> = None;

    for primitive in list(doc, "meshes")
        .iter()
        .filter_map(|mesh| mesh.get("primitives").and_then(Value::as_array))
        .flatten()
    {
        let position = accessor(doc, primitive.pointer("/attributes/POSITION"));
        let position_count = position
            .and_then(|a| a.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        vertices += position_count;

        if let Some(a) = position {
            if let (Some(min), Some(max)) = (vec3(a.get("min")), vec3(a.get("max"))) {
                let mut b = BoundingBox::around(min);
                b.include(max);
                match bounds.as_mut() {
                    Some(existing) => existing.merge(&b),
                    None => bounds = Some(b),
                }
            }
        }

        let index_count = accessor(doc, primitive.get("indices"))
            .and_then(|a| a.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(position_count);
        let mode = primitive
            .get("mode")
            .and_then(Value::as_i64)
            .unwrap_or(MODE_TRIANGLES);
        tris += match mode {
            MODE_TRIANGLES => index_count / 3,
            MODE_TRIANGLE_STRIP | MODE_TRIANGLE_FAN => (index_count - 2).max(0),
            _ => 0,
        };
    }

    let embedded = list(doc, "scenes")
        .iter()
        .filter_map(|scene| scene.pointer(&format!("/extras/{EMBEDDED_METADATA_KEY}")))
        .find(|value| value.is_object())
        .cloned();

    let asset_field = |key: &str| {
        doc.get("asset")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let mut report = GeometryReport {
        tri_count: Some(tris),
        vertex_count: Some(vertices),
        mesh_count: count("meshes"),
        material_count: count("materials"),
        material_names: names("materials"),
        texture_count: count("textures"),
        animation_count: count("animations"),
        animation_names: names("animations"),
        node_count: count("nodes"),
        skin_count: count("skins"),
        camera_count: count("cameras"),
        generator: asset_field("generator"),
        gltf_version: asset_field("version"),
        copyright: asset_field("copyright"),
        embedded,
        ..GeometryReport::default()
    };
    report.set_bounds(bounds);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(format: AssetFormat, data: &[u8]) -> Result<GeometryReport, ExtractError> {
        GeometryExtractor.extract(format, data)
    }

    fn binary_stl_bytes(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
        let mut data = vec![0u8; STL_HEADER_LEN];
        data.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for tri in triangles {
            data.extend_from_slice(&[0u8; 12]);
            for vertex in tri {
                for c in vertex {
                    data.extend_from_slice(&c.to_le_bytes());
                }
            }
            data.extend_from_slice(&[0u8; 2]);
        }
        data
    }

    #[test]
    fn test_binary_stl() {
        let data = binary_stl_bytes(&[
            [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, 3.0]],
            [[-1.0, 0.0, 0.0], [1.0, 0.5, 0.0], [0.0, 2.0, 1.0]],
        ]);
        let report = extract(AssetFormat::Stl, &data).unwrap();

        assert_eq!(report.tri_count, Some(2));
        assert_eq!(report.vertex_count, Some(6));
        let bounds = report.bounding_box.unwrap();
        assert_eq!((bounds.min.x, bounds.min.y, bounds.min.z), (-1.0, 0.0, 0.0));
        assert_eq!((bounds.max.x, bounds.max.y, bounds.max.z), (1.0, 2.0, 3.0));
        assert_eq!(report.dimensions.unwrap().width, 2.0);
    }

    #[test]
    fn test_binary_stl_with_solid_header() {
        let mut data = binary_stl_bytes(&[[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]]);
        data[..5].copy_from_slice(b"solid");
        assert_eq!(extract(AssetFormat::Stl, &data).unwrap().tri_count, Some(1));
    }

    #[test]
    fn test_ascii_stl() {
        let data = b"solid ring
  facet normal 0 0 1
    outer loop
      vertex 0 0 0
      vertex 2 0 0
      vertex 0 1 0
    endloop
  endfacet
endsolid ring
";
        let report = extract(AssetFormat::Stl, data).unwrap();
        assert_eq!(report.tri_count, Some(1));
        assert_eq!(report.vertex_count, Some(3));
        assert_eq!(report.dimensions.unwrap().width, 2.0);
    }

    #[test]
    fn test_truncated_stl_is_malformed() {
        let mut data = binary_stl_bytes(&[[[0.0; 3]; 3]]);
        data.truncate(data.len() - 10);
        assert!(matches!(
            extract(AssetFormat::Stl, &data),
            Err(ExtractError::Malformed { .. })
        ));
    }

    #[test]
    fn test_obj_triangulates_faces() {
        let data = b"o cube
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 4
usemtl red
f 1 2 3 4
usemtl blue
f 1 2 3
usemtl red
";
        let report = extract(AssetFormat::Obj, data).unwrap();
        assert_eq!(report.tri_count, Some(3));
        assert_eq!(report.vertex_count, Some(4));
        assert_eq!(report.mesh_count, Some(1));
        assert_eq!(report.material_names, vec!["red", "blue"]);
        assert_eq!(report.bounding_box.unwrap().max.z, 4.0);
    }

    #[test]
    fn test_ply_header() {
        let data = b"ply
format binary_little_endian 1.0
element vertex 8
property float x
element face 12
property list uchar int vertex_indices
end_header
\x00\x01";
        let report = extract(AssetFormat::Ply, data).unwrap();
        assert_eq!(report.vertex_count, Some(8));
        assert_eq!(report.tri_count, Some(12));

        assert!(extract(AssetFormat::Ply, b"ply\nelement vertex 8\n").is_err());
    }

    fn sample_gltf() -> Value {
        json!({
            "asset": { "version": "2.0", "generator": "Blender glTF exporter" },
            "scenes": [{ "nodes": [0], "extras": { "metro_metadata": { "useCase": "UC2" } } }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{
                "primitives": [
                    { "attributes": { "POSITION": 0 }, "indices": 1 },
                    { "attributes": { "POSITION": 2 }, "mode": 5 }
                ]
            }],
            "accessors": [
                { "count": 24, "min": [-1.0, -1.0, -1.0], "max": [1.0, 1.0, 1.0] },
                { "count": 36 },
                { "count": 6, "min": [0.0, 0.0, 0.0], "max": [3.0, 0.5, 0.5] }
            ],
            "materials": [{ "name": "steel" }, {}],
            "animations": [{ "name": "spin" }]
        })
    }

    #[test]
    fn test_gltf_document() {
        let data = serde_json::to_vec(&sample_gltf()).unwrap();
        let report = extract(AssetFormat::Gltf, &data).unwrap();

        assert_eq!(report.tri_count, Some(12 + 4));
        assert_eq!(report.vertex_count, Some(30));
        assert_eq!(report.mesh_count, Some(1));
        assert_eq!(report.material_count, Some(2));
        assert_eq!(report.material_names, vec!["steel"]);
        assert_eq!(report.animation_count, Some(1));
        assert_eq!(report.texture_count, None);
        assert_eq!(report.generator.as_deref(), Some("Blender glTF exporter"));
        assert_eq!(report.embedded, Some(json!({ "useCase": "UC2" })));

        let bounds = report.bounding_box.unwrap();
        assert_eq!(bounds.min.x, -1.0);
        assert_eq!(bounds.max.x, 3.0);
    }

    #[test]
    fn test_glb_container() {
        let mut json = serde_json::to_vec(&sample_gltf()).unwrap();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }

        let mut data = Vec::new();
        data.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&((20 + json.len()) as u32).to_le_bytes());
        data.extend_from_slice(&(json.len() as u32).to_le_bytes());
        data.extend_from_slice(&GLB_JSON_CHUNK.to_le_bytes());
        data.extend_from_slice(&json);

        let report = extract(AssetFormat::Glb, &data).unwrap();
        assert_eq!(report.tri_count, Some(16));

        assert!(matches!(
            extract(AssetFormat::Glb, b"not a glb"),
            Err(ExtractError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unsupported_formats() {
        for format in [AssetFormat::Usdz, AssetFormat::Blend, AssetFormat::Fbx] {
            assert!(matches!(
                extract(format, b"anything"),
                Err(ExtractError::Unsupported(f)) if f == format
            ));
        }
    }
}
