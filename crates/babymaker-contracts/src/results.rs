use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Baby,
    Family,
}

impl GenerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baby => "baby",
            Self::Family => "family",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Success,
    Failed,
}

/// Where a persisted image ended up.
///
/// A blob keeps both its bare `url` and a `download_url` carrying the
/// access token; only the latter opens on a private container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "snake_case")]
pub enum StoredRef {
    Local {
        path: PathBuf,
    },
    Blob {
        container: String,
        name: String,
        url: String,
        download_url: String,
    },
}

impl fmt::Display for StoredRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::Blob { download_url, .. } => f.write_str(download_url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub stored: Option<StoredRef>,
    pub storage_error: Option<String>,
}

impl GeneratedImage {
    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stored: None,
            storage_error: None,
        }
    }

    /// The stored location, or the remote URL when persisting failed.
    pub fn reference(&self) -> String {
        match &self.stored {
            Some(stored) => stored.to_string(),
            None => self.url.clone(),
        }
    }
}

/// Outcome of one remote call. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    kind: GenerationKind,
    status: GenerationStatus,
    images: Vec<GeneratedImage>,
    error: Option<String>,
    seed_used: i64,
    prompt: String,
    prediction_id: Option<String>,
}

impl GenerationResult {
    pub fn succeeded(
        kind: GenerationKind,
        images: Vec<GeneratedImage>,
        seed_used: i64,
        prompt: impl Into<String>,
        prediction_id: Option<String>,
    ) -> Self {
        Self {
            kind,
            status: GenerationStatus::Success,
            images,
            error: None,
            seed_used,
            prompt: prompt.into(),
            prediction_id,
        }
    }

    pub fn failed(
        kind: GenerationKind,
        error: impl Into<String>,
        seed_used: i64,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status: GenerationStatus::Failed,
            images: Vec::new(),
            error: Some(error.into()),
            seed_used,
            prompt: prompt.into(),
            prediction_id: None,
        }
    }

    pub fn kind(&self) -> GenerationKind {
        self.kind
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Success
    }

    pub fn images(&self) -> &[GeneratedImage] {
        &self.images
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn seed_used(&self) -> i64 {
        self.seed_used
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn prediction_id(&self) -> Option<&str> {
        self.prediction_id.as_deref()
    }

    pub fn primary_url(&self) -> Option<&str> {
        self.images.first().map(|image| image.url.as_str())
    }

    pub fn image_ref(&self) -> Option<String> {
        self.images.first().map(GeneratedImage::reference)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub baby: GenerationResult,
    pub family: Option<GenerationResult>,
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        if !self.baby.is_success() {
            return 1;
        }
        match &self.family {
            Some(family) if family.is_success() => 0,
            _ => 2,
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("session {}", self.session_id));
        push_result(&mut lines, &self.baby);
        match &self.family {
            Some(family) => push_result(&mut lines, family),
            None => lines.push("family: skipped (baby generation failed)".to_string()),
        }
        lines
    }
}

fn push_result(lines: &mut Vec<String>, result: &GenerationResult) {
    match result.status() {
        GenerationStatus::Success => {
            lines.push(format!(
                "{}: {} image(s), seed {}",
                result.kind(),
                result.images().len(),
                result.seed_used()
            ));
            for image in result.images() {
                lines.push(format!("  {}", image.reference()));
                if let Some(err) = &image.storage_error {
                    lines.push(format!("    not saved: {err}"));
                }
            }
        }
        GenerationStatus::Failed => lines.push(format!(
            "{}: failed: {}",
            result.kind(),
            result.error().unwrap_or("unknown error")
        )),
    }
}
