use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Encoded image content plus its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImagePayload {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EditKind {
    #[serde(rename = "style")]
    StyleEdit,
    #[serde(rename = "angle")]
    CameraAngle,
    #[serde(rename = "edit")]
    FreeFormEdit,
    #[serde(rename = "upscale")]
    Upscale,
    #[serde(rename = "variation")]
    Variation,
    #[serde(rename = "transform")]
    Transform,
}

impl EditKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::StyleEdit => "style",
            Self::CameraAngle => "angle",
            Self::FreeFormEdit => "edit",
            Self::Upscale => "upscale",
            Self::Variation => "variation",
            Self::Transform => "transform",
        }
    }
}

/// One committed generation; always holds at least one variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditStep {
    pub variants: Vec<ImagePayload>,
    pub kind: EditKind,
    pub instruction: String,
    pub created_at: DateTime<Utc>,
}

impl EditStep {
    pub fn single(kind: EditKind, instruction: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            variants: vec![image],
            kind,
            instruction: instruction.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns `None` for an empty variant list.
    pub fn with_variants(
        kind: EditKind,
        instruction: impl Into<String>,
        variants: Vec<ImagePayload>,
    ) -> Option<Self> {
        if variants.is_empty() {
            return None;
        }

        Some(Self {
            variants,
            kind,
            instruction: instruction.into(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub original: ImagePayload,
    pub edit_steps: Vec<EditStep>,
    /// `None` shows the original image.
    pub history_index: Option<usize>,
    pub selected_variant_index: Option<usize>,
    pub prompt_log: Vec<String>,
    /// File the project was imported from; never persisted.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Project {
    pub fn new(name: impl Into<String>, original: ImagePayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            original,
            edit_steps: Vec::new(),
            history_index: None,
            selected_variant_index: None,
            prompt_log: Vec::new(),
            source_path: None,
        }
    }

    pub fn to_summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            edit_count: self.edit_steps.len(),
            history_index: self.history_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub edit_count: usize,
    pub history_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StyleChoice {
    pub name: String,
    pub description: Option<String>,
    /// Percentage, 0..=100.
    pub intensity: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LightingOptions {
    pub brightness: u8,
    pub temperature: u8,
}

/// Per-call editing options. Nothing here is retained between calls.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditOptions {
    pub prompt: String,
    pub quick_action: Option<String>,
    pub style: Option<StyleChoice>,
    pub camera_angle: Option<String>,
    pub lighting: Option<LightingOptions>,
    pub backgrounds: Vec<String>,
    pub foregrounds: Vec<String>,
    pub masked: bool,
    /// "WIDTHxHEIGHT", applied to the generated image before it is stored.
    pub output_size: Option<String>,
}

/// What the session controller needs to run one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditIntent {
    pub instruction: String,
    pub label: String,
    pub kind: EditKind,
    pub masked: bool,
    pub output_size: Option<OutputSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
