use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::events::{
    EventPayload, EventWriter, GENERATION_COMPLETED, GENERATION_FAILED,
    GENERATION_SUBMITTED, IMAGE_STORED, PARENT_STAGED, SESSION_FINISHED, SESSION_STARTED,
    STATE_CHANGED, STORAGE_FAILED,
};
use babymaker_contracts::policy::MAX_SEED;
use babymaker_contracts::prompts::PromptBuilder;
use babymaker_contracts::request::{GenerationRequest, ImageSource, MAX_MODEL_INPUT_IMAGES};
use babymaker_contracts::results::{
    GeneratedImage, GenerationKind, GenerationResult, SessionOutcome,
};
use babymaker_contracts::settings::GenerationSettings;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use crate::client::{GenerationCall, GenerationClient, ImageBytes};
use crate::storage::{image_identifier, short_hash, StorageBucket, StorageSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    GeneratingBaby,
    GeneratingFamily,
    Done,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GeneratingBaby => "generating_baby",
            Self::GeneratingFamily => "generating_family",
            Self::Done => "done",
        }
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Runs one session: the baby call, then the family call only if the baby
/// call produced an image. Never panics; every failure ends up in the
/// returned outcome.
pub struct Orchestrator {
    client: Box<dyn GenerationClient>,
    sink: Box<dyn StorageSink>,
    prompts: PromptBuilder,
    events: EventWriter,
}

impl Orchestrator {
    pub fn new(
        client: Box<dyn GenerationClient>,
        sink: Box<dyn StorageSink>,
        events: EventWriter,
    ) -> Self {
        Self {
            client,
            sink,
            prompts: PromptBuilder::default(),
            events,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn run(&self, request: &GenerationRequest) -> SessionOutcome {
        let settings = request.settings();
        let seed = resolve_seed(settings.seed);
        self.emit(
            SESSION_STARTED,
            json!({
                "client": self.client.name(),
                "sink": self.sink.name(),
                "parents": request
                    .parent_images()
                    .iter()
                    .map(ImageSource::describe)
                    .collect::<Vec<_>>(),
                "settings": settings,
                "seed": seed,
            }),
        );

        self.transition(SessionState::Idle, SessionState::GeneratingBaby);
        let parent_inputs = self.stage_parents(request.parent_images());
        let baby = self.generate(
            GenerationKind::Baby,
            parent_inputs.clone(),
            settings,
            settings.num_outputs,
            seed,
        );

        let family = match baby.primary_url() {
            Some(baby_url) if baby.is_success() => {
                self.transition(SessionState::GeneratingBaby, SessionState::GeneratingFamily);
                let inputs = family_inputs(&parent_inputs, baby_url);
                let family = self.generate(GenerationKind::Family, inputs, settings, 1, seed);
                self.transition(SessionState::GeneratingFamily, SessionState::Done);
                Some(family)
            }
            _ => {
                self.transition(SessionState::GeneratingBaby, SessionState::Done);
                None
            }
        };

        let outcome = SessionOutcome {
            session_id: self.events.session_id().to_string(),
            baby,
            family,
        };
        self.emit(
            SESSION_FINISHED,
            json!({
                "exit_code": outcome.exit_code(),
                "baby": outcome.baby.status(),
                "family": outcome.family.as_ref().map(GenerationResult::status),
            }),
        );
        outcome
    }

    fn generate(
        &self,
        kind: GenerationKind,
        images: Vec<String>,
        settings: &GenerationSettings,
        num_outputs: i64,
        seed: i64,
    ) -> GenerationResult {
        let prompt = match self.prompts.build_prompt(settings, kind) {
            Ok(prompt) => prompt,
            Err(err) => return self.failed(kind, &err, seed, String::new()),
        };
        let call = GenerationCall {
            kind,
            prompt: prompt.clone(),
            images,
            settings: settings.clone(),
            num_outputs,
            seed,
        };
        self.emit(
            GENERATION_SUBMITTED,
            json!({
                "kind": kind,
                "prompt": prompt,
                "input_images": call.images.len(),
                "num_outputs": num_outputs,
                "seed": seed,
            }),
        );

        let output = match self.client.generate(&call) {
            Ok(output) => output,
            Err(err) => return self.failed(kind, &err, seed, prompt),
        };
        let seed_used = output.seed_used.unwrap_or(seed);
        self.emit(
            GENERATION_COMPLETED,
            json!({
                "kind": kind,
                "prediction_id": output.prediction_id,
                "urls": output.urls,
                "seed_used": seed_used,
                "warnings": output.warnings,
                "provider_request": Value::Object(output.provider_request.clone()),
            }),
        );

        let stamp = Utc::now();
        let images = output
            .urls
            .iter()
            .enumerate()
            .map(|(index, url)| self.store(kind, url, seed_used, index, stamp))
            .collect();
        GenerationResult::succeeded(kind, images, seed_used, prompt, output.prediction_id)
    }

    fn store(
        &self,
        kind: GenerationKind,
        url: &str,
        seed: i64,
        index: usize,
        stamp: chrono::DateTime<Utc>,
    ) -> GeneratedImage {
        let stored = self.client.download(url).and_then(|image| {
            let identifier = image_identifier(kind.as_str(), stamp, seed, index, &image.bytes);
            self.sink
                .persist(&image, StorageBucket::for_kind(kind), &identifier)
        });
        match stored {
            Ok(stored) => {
                self.emit(
                    IMAGE_STORED,
                    json!({ "kind": kind, "url": url, "stored": stored }),
                );
                GeneratedImage {
                    url: url.to_string(),
                    stored: Some(stored),
                    storage_error: None,
                }
            }
            Err(err) => {
                self.emit(
                    STORAGE_FAILED,
                    json!({ "kind": kind, "url": url, "error": err.to_string() }),
                );
                GeneratedImage {
                    url: url.to_string(),
                    stored: None,
                    storage_error: Some(err.user_message()),
                }
            }
        }
    }

    /// Turns parent images into `input_image*` values. With a remote sink,
    /// inline images are uploaded first and forwarded by URL.
    fn stage_parents(&self, parents: &[ImageSource]) -> Vec<String> {
        let stamp = Utc::now();
        parents
            .iter()
            .enumerate()
            .map(|(index, parent)| match parent {
                ImageSource::Inline(inline) if self.sink.is_remote() => {
                    let image =
                        ImageBytes::new(inline.bytes.clone(), Some(inline.mime_type.clone()));
                    let identifier = format!(
                        "parent_{}_{index:02}_{}",
                        stamp.format("%Y%m%d_%H%M%S"),
                        short_hash(&image.bytes)
                    );
                    let staged = self
                        .sink
                        .persist(&image, StorageBucket::ParentPhotos, &identifier)
                        .and_then(|stored| {
                            self.sink.fetch_url(&stored).ok_or_else(|| {
                                GenerationError::StorageFailure(format!(
                                    "{stored} has no fetchable URL"
                                ))
                            })
                        });
                    match staged {
                        Ok(url) => {
                            self.emit(PARENT_STAGED, json!({ "index": index, "url": url }));
                            url
                        }
                        Err(err) => {
                            self.emit(
                                STORAGE_FAILED,
                                json!({ "index": index, "error": err.to_string() }),
                            );
                            parent.to_input_value()
                        }
                    }
                }
                _ => parent.to_input_value(),
            })
            .collect()
    }

    fn failed(
        &self,
        kind: GenerationKind,
        err: &GenerationError,
        seed: i64,
        prompt: String,
    ) -> GenerationResult {
        self.emit(
            GENERATION_FAILED,
            json!({
                "kind": kind,
                "error_kind": err.kind(),
                "error": err.to_string(),
            }),
        );
        GenerationResult::failed(kind, err.user_message(), seed, prompt)
    }

    fn transition(&self, from: SessionState, to: SessionState) {
        self.emit(
            STATE_CHANGED,
            json!({ "from": from.as_str(), "to": to.as_str() }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("babymaker: event log write failed: {err:#}");
        }
    }
}

/// A fixed seed passes through; `None` draws one for the whole session.
pub fn resolve_seed(requested: Option<i64>) -> i64 {
    match requested {
        Some(seed) => seed.clamp(0, MAX_SEED),
        None => rand::thread_rng().gen_range(0..=MAX_SEED),
    }
}

/// Parents plus the baby image, capped at what the model accepts. The baby
/// always goes last.
pub fn family_inputs(parent_inputs: &[String], baby_url: &str) -> Vec<String> {
    let mut inputs: Vec<String> = parent_inputs
        .iter()
        .take(MAX_MODEL_INPUT_IMAGES - 1)
        .cloned()
        .collect();
    inputs.push(baby_url.to_string());
    inputs
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use babymaker_contracts::request::{InlineImage, UrlImage};
    use babymaker_contracts::results::{GenerationStatus, StoredRef};
    use babymaker_contracts::settings::GenerationSettings;
    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::client::GenerationOutput;
    use crate::storage::LocalSink;

    const BABY_URL: &str = "https://replicate.delivery/pbxt/baby.png";
    const FAMILY_URL: &str = "https://replicate.delivery/pbxt/family.png";

    #[derive(Clone, Default)]
    struct StubClient {
        fail_kind: Option<GenerationKind>,
        fixed_url: Option<String>,
        calls: Arc<Mutex<Vec<GenerationCall>>>,
    }

    impl StubClient {
        fn recorded(&self) -> Vec<GenerationCall> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl GenerationClient for StubClient {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, call: &GenerationCall) -> Result<GenerationOutput, GenerationError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call.clone());
            }
            if self.fail_kind == Some(call.kind) {
                return Err(GenerationError::RemoteFailure("prediction failed: boom".into()));
            }
            if let Some(url) = &self.fixed_url {
                return Ok(GenerationOutput {
                    urls: vec![url.clone()],
                    ..GenerationOutput::default()
                });
            }
            let urls = match call.kind {
                GenerationKind::Baby => (0..call.num_outputs)
                    .map(|idx| {
                        if idx == 0 {
                            BABY_URL.to_string()
                        } else {
                            format!("{BABY_URL}?v={idx}")
                        }
                    })
                    .collect(),
                GenerationKind::Family => vec![FAMILY_URL.to_string()],
            };
            Ok(GenerationOutput {
                urls,
                prediction_id: Some(format!("pred-{}", call.kind)),
                ..GenerationOutput::default()
            })
        }

        fn download(&self, url: &str) -> Result<ImageBytes, GenerationError> {
            let shade = (url.len() % 256) as u8;
            let red = if url.contains("family") { 200 } else { 10 };
            Ok(ImageBytes::new(
                encode(ImageFormat::Png, Rgb([red, shade, 40])),
                Some("image/png".to_string()),
            ))
        }
    }

    fn encode(format: ImageFormat, color: Rgb<u8>) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        let written = RgbImage::from_pixel(8, 8, color).write_to(&mut out, format);
        assert!(written.is_ok());
        out.into_inner()
    }

    fn jpeg_parent(label: &str, shade: u8) -> ImageSource {
        ImageSource::Inline(InlineImage {
            bytes: encode(ImageFormat::Jpeg, Rgb([shade, shade, shade])),
            mime_type: "image/jpeg".to_string(),
            label: Some(label.to_string()),
        })
    }

    fn url_parent(idx: usize) -> ImageSource {
        ImageSource::Url(UrlImage {
            url: format!("https://example.com/parent-{idx}.jpg"),
        })
    }

    fn orchestrator(client: StubClient, root: &std::path::Path) -> Orchestrator {
        Orchestrator::new(
            Box::new(client),
            Box::new(LocalSink::new(root)),
            EventWriter::new(root.join("events.jsonl"), "session-test"),
        )
    }

    #[test]
    fn end_to_end_stores_baby_and_family() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient::default();
        let settings = GenerationSettings::default()
            .with_steps(40)
            .with_identity_strength(25)
            .with_seed(42);
        let request = GenerationRequest::new(
            vec![jpeg_parent("mom.jpg", 30), jpeg_parent("dad.jpg", 90)],
            settings,
        )?;

        let outcome = orchestrator(client.clone(), temp.path()).run(&request);

        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.session_id, "session-test");
        assert_eq!(outcome.baby.status(), GenerationStatus::Success);
        let Some(family) = &outcome.family else {
            anyhow::bail!("family result missing");
        };
        assert!(family.is_success());
        assert_eq!(outcome.baby.seed_used(), 42);
        assert_eq!(family.seed_used(), 42);

        let baby_ref = outcome.baby.image_ref().unwrap_or_default();
        let family_ref = family.image_ref().unwrap_or_default();
        assert_ne!(baby_ref, family_ref);
        assert!(baby_ref.contains("generated-babies"));
        assert!(family_ref.contains("generated-families"));
        assert!(std::path::Path::new(&baby_ref).exists());
        assert!(std::path::Path::new(&family_ref).exists());

        let calls = client.recorded();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].images.len(), 2);
        assert!(calls[0].images[0].starts_with("data:image/jpeg;base64,"));
        assert_eq!(calls[0].settings.steps, 40);
        assert_eq!(calls[0].settings.identity_strength, 25);
        assert_eq!(calls[1].images.len(), 3);
        assert_eq!(calls[1].images[2], BABY_URL);
        assert_eq!(calls[1].num_outputs, 1);
        assert_eq!(calls[0].seed, calls[1].seed);

        let events = std::fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert!(events.contains("\"to\":\"generating_family\""));
        assert!(!events.contains("base64,"));
        Ok(())
    }

    #[test]
    fn same_url_for_both_calls_still_stores_two_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient {
            fixed_url: Some("https://replicate.delivery/pbxt/out.png".to_string()),
            ..StubClient::default()
        };
        let request = GenerationRequest::new(
            vec![jpeg_parent("a.jpg", 10), jpeg_parent("b.jpg", 200)],
            GenerationSettings::default().with_steps(40),
        )?;

        let outcome = orchestrator(client, temp.path()).run(&request);

        assert_eq!(outcome.exit_code(), 0);
        let baby_ref = outcome.baby.image_ref().unwrap_or_default();
        let family_ref = outcome
            .family
            .as_ref()
            .and_then(GenerationResult::image_ref)
            .unwrap_or_default();
        assert_ne!(baby_ref, family_ref);
        assert!(std::path::Path::new(&baby_ref).is_file());
        assert!(std::path::Path::new(&family_ref).is_file());
        Ok(())
    }

    #[test]
    fn baby_failure_skips_family() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient {
            fail_kind: Some(GenerationKind::Baby),
            ..StubClient::default()
        };
        let request =
            GenerationRequest::new(vec![url_parent(0), url_parent(1)], GenerationSettings::default())?;

        let outcome = orchestrator(client.clone(), temp.path()).run(&request);

        assert_eq!(outcome.baby.status(), GenerationStatus::Failed);
        assert!(outcome.baby.error().unwrap_or_default().contains("boom"));
        assert!(outcome.family.is_none());
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(client.recorded().len(), 1);
        Ok(())
    }

    #[test]
    fn family_failure_keeps_baby() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient {
            fail_kind: Some(GenerationKind::Family),
            ..StubClient::default()
        };
        let request =
            GenerationRequest::new(vec![url_parent(0), url_parent(1)], GenerationSettings::default())?;

        let outcome = orchestrator(client, temp.path()).run(&request);

        assert!(outcome.baby.is_success());
        assert_eq!(
            outcome.family.as_ref().map(GenerationResult::status),
            Some(GenerationStatus::Failed)
        );
        assert_eq!(outcome.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn four_parents_forward_three_plus_baby() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient::default();
        let parents = (0..4).map(url_parent).collect();
        let request = GenerationRequest::new(parents, GenerationSettings::default())?;

        orchestrator(client.clone(), temp.path()).run(&request);

        let calls = client.recorded();
        assert_eq!(calls[0].images.len(), 4);
        assert_eq!(
            calls[1].images,
            vec![
                "https://example.com/parent-0.jpg".to_string(),
                "https://example.com/parent-1.jpg".to_string(),
                "https://example.com/parent-2.jpg".to_string(),
                BABY_URL.to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn variations_are_stored_separately() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let client = StubClient::default();
        let settings = GenerationSettings::default().with_num_outputs(3);
        let request = GenerationRequest::new(vec![url_parent(0), url_parent(1)], settings)?;

        let outcome = orchestrator(client, temp.path()).run(&request);

        let stored: Vec<&StoredRef> = outcome
            .baby
            .images()
            .iter()
            .filter_map(|image| image.stored.as_ref())
            .collect();
        assert_eq!(stored.len(), 3);
        assert_ne!(stored[0], stored[1]);
        assert_ne!(stored[1], stored[2]);
        Ok(())
    }

    #[test]
    fn storage_failure_keeps_remote_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocked");
        std::fs::write(&blocker, b"not a directory")?;
        let request =
            GenerationRequest::new(vec![url_parent(0), url_parent(1)], GenerationSettings::default())?;
        let orchestrator = Orchestrator::new(
            Box::new(StubClient::default()),
            Box::new(LocalSink::new(&blocker)),
            EventWriter::disabled("session-test"),
        );

        let outcome = orchestrator.run(&request);

        assert!(outcome.baby.is_success());
        assert_eq!(outcome.baby.image_ref().as_deref(), Some(BABY_URL));
        assert!(outcome.baby.images()[0].storage_error.is_some());
        Ok(())
    }

    #[test]
    fn seed_resolution_stays_in_range() {
        assert_eq!(resolve_seed(Some(7)), 7);
        for _ in 0..32 {
            let seed = resolve_seed(None);
            assert!((0..=MAX_SEED).contains(&seed));
        }
    }
}
