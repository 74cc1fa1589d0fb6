use crate::error::{Error, Result};
use crate::types::AssetFormat;

const MAX_FILE_STEM_LEN: usize = 100;

/// Derives the blob key for one version of an asset's payload:
/// `assets/{asset_id}/v{version}/{name}.{ext}`.
///
/// Distinct versions of the same asset never share a key.
#[must_use]
pub fn payload_path(asset_id: &str, version: i64, name: &str, format: AssetFormat) -> String {
    format!(
        "assets/{asset_id}/v{version}/{}.{}",
        file_stem(name),
        format.as_str()
    )
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_STEM_LEN)
        .collect();

    if stem.trim_matches('_').is_empty() {
        "asset".to_string()
    } else {
        stem
    }
}

/// Normalizes a blob key to `seg/seg/...` and rejects anything that could
/// escape the storage root.
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim();

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(Error::BadRequest("Path cannot be empty".to_string()));
    }

    for segment in &segments {
        validate_segment(segment)?;
    }

    Ok(segments.join("/"))
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment == "." || segment == ".." {
        return Err(Error::BadRequest(
            "Path segment cannot be a relative reference".to_string(),
        ));
    }

    if segment.len() > 255 {
        return Err(Error::BadRequest(
            "Path segment cannot exceed 255 characters".to_string(),
        ));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r', '\\'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::BadRequest(
            "Path segment contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_path_layout() {
        assert_eq!(
            payload_path("a1", 3, "Benzene Ring", AssetFormat::Glb),
            "assets/a1/v3/Benzene_Ring.glb"
        );
    }

    #[test]
    fn test_payload_path_differs_per_version() {
        let v1 = payload_path("a1", 1, "ring", AssetFormat::Stl);
        let v2 = payload_path("a1", 2, "ring", AssetFormat::Stl);
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_payload_path_sanitizes_name() {
        assert_eq!(
            payload_path("a1", 1, "../../etc/passwd", AssetFormat::Obj),
            "assets/a1/v1/______etc_passwd.obj"
        );
        assert_eq!(
            payload_path("a1", 1, "///", AssetFormat::Obj),
            "assets/a1/v1/asset.obj"
        );
    }

    #[test]
    fn test_normalize_path_basic() {
        assert_eq!(normalize_path("assets/a1").unwrap(), "assets/a1");
        assert_eq!(normalize_path("/assets/a1/").unwrap(), "assets/a1");
        assert_eq!(normalize_path("//assets//a1//").unwrap(), "assets/a1");
    }

    #[test]
    fn test_normalize_path_rejects_traversal() {
        assert!(normalize_path("").is_err());
        assert!(normalize_path("/").is_err());
        assert!(normalize_path("assets/../secret").is_err());
        assert!(normalize_path("./assets").is_err());
        assert!(normalize_path("assets\\a1").is_err());
        assert!(normalize_path("assets/a\0b").is_err());
    }
}
