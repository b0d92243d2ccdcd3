//! Shared vocabulary for what gets published where.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for a publishing target (e.g. `"youtube"`).
///
/// The set of valid platforms comes from configuration; the scheduler
/// validates submissions against it. The type itself carries no policy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(String);

impl Platform {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Platform {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Opaque reference to the clip being uploaded: a path or handle produced by
/// the clip pipeline. The scheduler never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipRef(String);

impl ClipRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ClipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipRef {
    fn from(reference: &str) -> Self {
        Self(reference.to_string())
    }
}

/// Metadata that accompanies a clip to the platform: caption, title, tags.
///
/// Produced by the content analyzer upstream; treated as an opaque payload by
/// the scheduler and handed to the publisher verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_serializes_as_bare_string() {
        let platform = Platform::from("youtube");
        let json = serde_json::to_string(&platform).unwrap();
        assert_eq!(json, "\"youtube\"");

        let decoded: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, platform);
    }

    #[test]
    fn clip_ref_empty_detection() {
        assert!(ClipRef::from("").is_empty());
        assert!(ClipRef::from("   ").is_empty());
        assert!(!ClipRef::from("clips/intro.mp4").is_empty());
    }

    #[test]
    fn metadata_omits_absent_fields() {
        let metadata = PublishMetadata::default();
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("title").is_none());
        assert!(json.get("caption").is_none());
        assert!(json.get("hashtags").is_none());
    }

    #[test]
    fn metadata_roundtrip() {
        let metadata = PublishMetadata {
            title: Some("Opening hook".to_string()),
            caption: Some("The moment it all clicked".to_string()),
            hashtags: vec!["shorts".to_string(), "clips".to_string()],
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let decoded: PublishMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, metadata);
    }
}
