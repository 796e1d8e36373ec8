use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use serde::Serialize;

use crate::errors::GenerationError;
use crate::policy;
use crate::settings::{GenerationSettings, SettingsInput};

pub const MIN_PARENT_IMAGES: usize = 2;
pub const MAX_PARENT_IMAGES: usize = 4;
/// PhotoMaker reads `input_image` through `input_image4`.
pub const MAX_MODEL_INPUT_IMAGES: usize = 4;

const PARENT_FIELD: &str = "parent_images";

/// One image handed to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    Url(UrlImage),
    Inline(InlineImage),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineImage {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub label: Option<String>,
}

impl ImageSource {
    pub fn from_url(url: impl Into<String>) -> Result<Self, GenerationError> {
        let url = url.into();
        let trimmed = url.trim();
        if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
            return Err(GenerationError::validation(
                Some(PARENT_FIELD),
                format!("'{trimmed}' is not an http(s) URL"),
            ));
        }
        Ok(Self::Url(UrlImage {
            url: trimmed.to_string(),
        }))
    }

    /// Wraps raw bytes, sniffing the format from the content.
    pub fn from_bytes(bytes: Vec<u8>, label: Option<String>) -> Result<Self, GenerationError> {
        let shown = label.clone().unwrap_or_else(|| "image".to_string());
        let format = image::guess_format(&bytes).map_err(|_| {
            GenerationError::validation(
                Some(PARENT_FIELD),
                format!("{shown} is not a recognised image"),
            )
        })?;
        let mime_type = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
            other => {
                return Err(GenerationError::validation(
                    Some(PARENT_FIELD),
                    format!("{shown} is {other:?}; only PNG, JPEG and WebP are supported"),
                ))
            }
        };
        Ok(Self::Inline(InlineImage {
            bytes,
            mime_type: mime_type.to_string(),
            label,
        }))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read parent image {}", path.display()))?;
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());
        Ok(Self::from_bytes(bytes, label)?)
    }

    /// Accepts either an http(s) URL or a local file path.
    pub fn from_arg(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
            return Ok(Self::from_url(trimmed)?);
        }
        Self::from_path(Path::new(trimmed))
    }

    /// The string placed in an `input_image*` field.
    pub fn to_input_value(&self) -> String {
        match self {
            Self::Url(image) => image.url.clone(),
            Self::Inline(image) => format!(
                "data:{};base64,{}",
                image.mime_type,
                STANDARD.encode(&image.bytes)
            ),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Url(image) => image.url.clone(),
            Self::Inline(image) => format!(
                "{} ({}, {} bytes)",
                image.label.as_deref().unwrap_or("inline image"),
                image.mime_type,
                image.bytes.len()
            ),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

/// Everything one session needs. Built fresh per invocation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    parent_images: Vec<ImageSource>,
    settings: GenerationSettings,
}

impl GenerationRequest {
    pub fn new(
        parent_images: Vec<ImageSource>,
        settings: GenerationSettings,
    ) -> Result<Self, GenerationError> {
        let count = parent_images.len();
        if !(MIN_PARENT_IMAGES..=MAX_PARENT_IMAGES).contains(&count) {
            return Err(GenerationError::validation(
                Some(PARENT_FIELD),
                format!(
                    "expected {MIN_PARENT_IMAGES} to {MAX_PARENT_IMAGES} parent images, got {count}"
                ),
            ));
        }
        Ok(Self {
            parent_images,
            settings: policy::clamp(&settings),
        })
    }

    pub fn from_input(
        parent_images: Vec<ImageSource>,
        input: &SettingsInput,
    ) -> Result<Self, GenerationError> {
        let settings = policy::resolve(input)?;
        Self::new(parent_images, settings)
    }

    pub fn parent_images(&self) -> &[ImageSource] {
        &self.parent_images
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }
}
