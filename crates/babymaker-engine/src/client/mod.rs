mod dryrun;
mod replicate;

pub use dryrun::DryrunClient;
pub use replicate::{
    build_prediction_input, classify_http_failure, extract_output_urls, seed_from_logs,
    ReplicateClient, NEGATIVE_PROMPT,
};

use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::results::GenerationKind;
use babymaker_contracts::settings::GenerationSettings;
use image::ImageFormat;
use serde_json::{Map, Value};

use crate::config::EngineConfig;

/// One remote model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub kind: GenerationKind,
    pub prompt: String,
    /// Values for `input_image`, `input_image2`, ... in order: URLs or data URIs.
    pub images: Vec<String>,
    pub settings: GenerationSettings,
    pub num_outputs: i64,
    pub seed: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub urls: Vec<String>,
    pub prediction_id: Option<String>,
    /// Seed the model reports having used, when it says so.
    pub seed_used: Option<i64>,
    pub provider_request: Map<String, Value>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl ImageBytes {
    pub fn new(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self { bytes, mime_type }
    }

    /// File extension from the content itself, then the declared MIME type.
    pub fn extension(&self) -> &'static str {
        match image::guess_format(&self.bytes) {
            Ok(ImageFormat::Png) => return "png",
            Ok(ImageFormat::Jpeg) => return "jpg",
            Ok(ImageFormat::WebP) => return "webp",
            _ => {}
        }
        let lowered = self
            .mime_type
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            "jpg"
        } else if lowered.contains("webp") {
            "webp"
        } else {
            "png"
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension() {
            "jpg" => "image/jpeg",
            "webp" => "image/webp",
            _ => "image/png",
        }
    }
}

pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, call: &GenerationCall) -> Result<GenerationOutput, GenerationError>;
    fn download(&self, url: &str) -> Result<ImageBytes, GenerationError>;
}

/// Picks the dry-run client or the configured Replicate client.
pub fn client_from_config(
    config: &EngineConfig,
    dry_run: bool,
) -> Result<Box<dyn GenerationClient>, GenerationError> {
    if dry_run {
        return Ok(Box::new(DryrunClient::new()));
    }
    Ok(Box::new(ReplicateClient::from_config(config)?))
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
