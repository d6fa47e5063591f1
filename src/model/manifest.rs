//! Model manifest parsing and validation.

use crate::constants::{NUM_CLASSES, input, model};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Manifest describing a model and its weight shards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    /// Weight format; only `onnx` is supported.
    pub format: String,
    /// Input tensor shape, NHWC.
    pub input_shape: Vec<usize>,
    /// Output tensor shape.
    pub output_shape: Vec<usize>,
    /// Groups of weight shards, concatenated in order.
    pub weights_manifest: Vec<WeightGroup>,
    /// Optional SHA-256 checksums keyed by shard path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

/// One group of weight shard files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WeightGroup {
    /// Shard paths relative to the manifest.
    pub paths: Vec<String>,
}

impl ModelManifest {
    /// Parse and validate manifest JSON. `origin` names the source in errors.
    pub fn parse(bytes: &[u8], origin: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| Error::ManifestParse {
            origin: origin.to_string(),
            source: e,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check the manifest describes a model this crate can run.
    pub fn validate(&self) -> Result<()> {
        if self.format != model::FORMAT_ONNX {
            return Err(invalid(format!(
                "unsupported weight format '{}', expected '{}'",
                self.format,
                model::FORMAT_ONNX
            )));
        }

        if self.input_shape != input::SHAPE {
            return Err(invalid(format!(
                "input shape {:?} does not match {:?}",
                self.input_shape,
                input::SHAPE
            )));
        }

        if self.output_shape.last() != Some(&NUM_CLASSES)
            || self.output_shape.iter().product::<usize>() != NUM_CLASSES
        {
            return Err(invalid(format!(
                "output shape {:?} does not describe {NUM_CLASSES} classes",
                self.output_shape
            )));
        }

        let paths = self.shard_paths();
        if paths.is_empty() {
            return Err(invalid("manifest lists no weight shards".to_string()));
        }

        for path in paths {
            if path.is_empty()
                || path.contains(['/', '\\'])
                || path == ".."
                || path == "."
                || path == model::MANIFEST_FILE
            {
                return Err(invalid(format!("shard path '{path}' is not a plain file name")));
            }
        }

        Ok(())
    }

    /// All shard paths in concatenation order.
    pub fn shard_paths(&self) -> Vec<&str> {
        self.weights_manifest
            .iter()
            .flat_map(|g| g.paths.iter().map(String::as_str))
            .collect()
    }

    /// Expected checksum for a shard, lower-case hex.
    pub fn checksum_for(&self, path: &str) -> Option<String> {
        self.checksums.get(path).map(|c| c.to_ascii_lowercase())
    }
}

fn invalid(reason: String) -> Error {
    Error::ManifestInvalid { reason }
}

/// Resolve a shard path against the manifest URL.
pub fn shard_url(manifest_url: &str, path: &str) -> Result<String> {
    let err = || Error::ShardUrl {
        base: manifest_url.to_string(),
        path: path.to_string(),
    };
    let base = reqwest::Url::parse(manifest_url).map_err(|_| err())?;
    base.join(path).map(String::from).map_err(|_| err())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VALID: &str = r#"{
        "format": "onnx",
        "inputShape": [1, 224, 224, 3],
        "outputShape": [1, 4],
        "weightsManifest": [
            {"paths": ["group1-shard1of2.bin", "group1-shard2of2.bin"], "weights": []}
        ]
    }"#;

    #[test]
    fn test_parse_valid_manifest() {
        let manifest = ModelManifest::parse(VALID.as_bytes(), "test").unwrap();
        assert_eq!(
            manifest.shard_paths(),
            vec!["group1-shard1of2.bin", "group1-shard2of2.bin"]
        );
        assert!(manifest.checksums.is_empty());
    }

    #[test]
    fn test_rejects_unknown_format() {
        let json = VALID.replace("\"onnx\"", "\"tfjs-layers\"");
        let result = ModelManifest::parse(json.as_bytes(), "test");
        assert!(matches!(result, Err(Error::ManifestInvalid { .. })));
    }

    #[test]
    fn test_rejects_wrong_class_count() {
        let json = VALID.replace("[1, 4]", "[1, 1000]");
        assert!(ModelManifest::parse(json.as_bytes(), "test").is_err());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let json = VALID.replace("group1-shard2of2.bin", "../../etc/passwd");
        let err = ModelManifest::parse(json.as_bytes(), "test").unwrap_err();
        assert!(err.to_string().contains("plain file name"));
    }

    #[test]
    fn test_rejects_garbage() {
        let result = ModelManifest::parse(b"{not json", "https://cdn.example/model.json");
        assert!(matches!(result, Err(Error::ManifestParse { .. })));
    }

    #[test]
    fn test_shard_url_resolves_relative_to_manifest() {
        let url = shard_url(
            "https://cdn.example.com/models/wildfire/model.json",
            "group1-shard1of2.bin",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://cdn.example.com/models/wildfire/group1-shard1of2.bin"
        );
    }

    #[test]
    fn test_checksum_lookup_is_case_insensitive() {
        let mut manifest = ModelManifest::parse(VALID.as_bytes(), "test").unwrap();
        manifest
            .checksums
            .insert("group1-shard1of2.bin".into(), "ABCDEF".into());
        assert_eq!(
            manifest.checksum_for("group1-shard1of2.bin").as_deref(),
            Some("abcdef")
        );
        assert_eq!(manifest.checksum_for("group1-shard2of2.bin"), None);
    }
}
