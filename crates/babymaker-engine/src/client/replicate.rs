use std::thread;
use std::time::{Duration, Instant};

use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::request::MAX_MODEL_INPUT_IMAGES;
use babymaker_contracts::options::LabeledOption as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{truncate_text, GenerationCall, GenerationClient, GenerationOutput, ImageBytes};
use crate::config::EngineConfig;

pub const NEGATIVE_PROMPT: &str = "nsfw, lowres, bad anatomy, bad hands, text, error, \
missing fingers, extra digit, fewer digits, cropped, worst quality, low quality, \
normal quality, jpeg artifacts, signature, watermark, username, blurry";

const SEED_LOG_PREFIX: &str = "Using seed:";
const MAX_DETAIL_CHARS: usize = 512;
const MAX_PREFER_WAIT_S: u64 = 60;

/// PhotoMaker on Replicate's predictions API.
pub struct ReplicateClient {
    api_base: String,
    api_token: String,
    version: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    prefer_wait: u64,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct Account {
    username: Option<String>,
}

impl ReplicateClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self, GenerationError> {
        let Some(api_token) = config.api_token.clone() else {
            return Err(GenerationError::NotConfigured(
                "REPLICATE_API_TOKEN not set".to_string(),
            ));
        };
        let http = HttpClient::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|err| GenerationError::NotConfigured(format!("http client: {err}")))?;
        Ok(Self {
            api_base: config.api_base.clone(),
            api_token,
            version: config.version_id().to_string(),
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
            prefer_wait: prefer_wait_seconds(config.http_timeout),
            http,
        })
    }

    /// Confirms the token is accepted. Returns the account name.
    pub fn check_connection(&self) -> Result<String, GenerationError> {
        let endpoint = format!("{}/account", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.api_token)
            .send()
            .map_err(|err| transport_failure(&endpoint, &err))?;
        let payload = response_json_or_error(response)?;
        let account: Account = serde_json::from_value(payload).map_err(|err| {
            GenerationError::RemoteFailure(format!("unexpected account payload: {err}"))
        })?;
        Ok(account.username.unwrap_or_else(|| "unknown".to_string()))
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.api_base)
    }

    fn poll_prediction(&self, poll_url: &str) -> Result<Value, GenerationError> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .map_err(|err| transport_failure(poll_url, &err))?;
            let payload = response_json_or_error(response)?;
            match prediction_status(&payload).as_str() {
                "succeeded" => return Ok(payload),
                "failed" | "canceled" => return Err(prediction_failure(&payload)),
                _ => {}
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(GenerationError::RemoteFailure(format!(
                    "prediction still running after {:.0}s",
                    self.poll_timeout.as_secs_f64()
                )));
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl GenerationClient for ReplicateClient {
    fn name(&self) -> &str {
        "replicate"
    }

    fn generate(&self, call: &GenerationCall) -> Result<GenerationOutput, GenerationError> {
        let endpoint = self.predictions_endpoint();
        let input = build_prediction_input(call);
        let payload = json!({
            "version": self.version,
            "input": Value::Object(input),
        });
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", format!("wait={}", self.prefer_wait))
            .json(&payload)
            .send()
            .map_err(|err| transport_failure(&endpoint, &err))?;
        let mut prediction = response_json_or_error(response)?;

        match prediction_status(&prediction).as_str() {
            "succeeded" => {}
            "failed" | "canceled" => return Err(prediction_failure(&prediction)),
            _ => {
                let poll_url = prediction
                    .get("urls")
                    .and_then(|urls| urls.get("get"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        GenerationError::RemoteFailure(
                            "prediction response has no poll URL".to_string(),
                        )
                    })?;
                prediction = self.poll_prediction(&poll_url)?;
            }
        }

        let mut urls = Vec::new();
        if let Some(output) = prediction.get("output") {
            extract_output_urls(output, &mut urls);
        }
        if urls.is_empty() {
            return Err(GenerationError::RemoteFailure(
                "model returned no images".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        if urls.len() < call.num_outputs.max(1) as usize {
            warnings.push(format!(
                "requested {} image(s), model returned {}",
                call.num_outputs,
                urls.len()
            ));
        }

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), Value::String(endpoint));
        provider_request.insert("payload".to_string(), payload);

        Ok(GenerationOutput {
            urls,
            prediction_id: prediction
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            seed_used: prediction
                .get("logs")
                .and_then(Value::as_str)
                .and_then(seed_from_logs),
            provider_request,
            warnings,
        })
    }

    fn download(&self, url: &str) -> Result<ImageBytes, GenerationError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| GenerationError::StorageFailure(format!("download {url}: {err}")))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            return Err(GenerationError::StorageFailure(format!(
                "download {url} returned {code}"
            )));
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| GenerationError::StorageFailure(format!("download {url}: {err}")))?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}

/// The `input` object of a PhotoMaker prediction.
pub fn build_prediction_input(call: &GenerationCall) -> Map<String, Value> {
    let settings = &call.settings;
    let mut input = Map::new();
    input.insert("prompt".to_string(), json!(call.prompt));
    input.insert("negative_prompt".to_string(), json!(NEGATIVE_PROMPT));
    input.insert("num_steps".to_string(), json!(settings.steps));
    input.insert("style_name".to_string(), json!(settings.style.label()));
    input.insert("num_outputs".to_string(), json!(call.num_outputs));
    input.insert("guidance_scale".to_string(), json!(settings.guidance_scale));
    input.insert(
        "style_strength_ratio".to_string(),
        json!(settings.identity_strength),
    );
    input.insert(
        "disable_safety_checker".to_string(),
        json!(!settings.safety_checker),
    );
    input.insert("seed".to_string(), json!(call.seed));
    for (idx, image) in call.images.iter().take(MAX_MODEL_INPUT_IMAGES).enumerate() {
        let key = if idx == 0 {
            "input_image".to_string()
        } else {
            format!("input_image{}", idx + 1)
        };
        input.insert(key, Value::String(image.clone()));
    }
    input
}

/// Seconds to hold the create call open; stays under the HTTP timeout so a
/// slow prediction falls through to polling instead of a transport error.
pub fn prefer_wait_seconds(http_timeout: Duration) -> u64 {
    http_timeout
        .as_secs()
        .saturating_sub(1)
        .clamp(1, MAX_PREFER_WAIT_S)
}

/// Maps a non-2xx answer from the API onto the error taxonomy.
pub fn classify_http_failure(code: u16, body: &str) -> GenerationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed
        .as_ref()
        .and_then(|value| value.get("detail").or_else(|| value.get("title")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), MAX_DETAIL_CHARS));
    match code {
        400 | 422 => {
            let field = parsed
                .as_ref()
                .and_then(|value| value.get("invalid_fields"))
                .and_then(Value::as_array)
                .and_then(|fields| fields.first())
                .and_then(|first| first.get("field"))
                .and_then(Value::as_str);
            GenerationError::validation(field, detail)
        }
        401 | 403 => GenerationError::RemoteFailure("unauthorized".to_string()),
        402 => GenerationError::RemoteFailure(format!("insufficient credit: {detail}")),
        _ => GenerationError::RemoteFailure(format!("HTTP {code}: {detail}")),
    }
}

/// Reads the seed PhotoMaker prints as `Using seed: N`.
pub fn seed_from_logs(logs: &str) -> Option<i64> {
    logs.lines().find_map(|line| {
        let (_, rest) = line.split_once(SEED_LOG_PREFIX)?;
        rest.split_whitespace().next()?.parse::<i64>().ok()
    })
}

/// Collects http(s) URLs from a prediction `output`, whatever its shape.
pub fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_output_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "output"] {
                if let Some(nested) = obj.get(key) {
                    extract_output_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| GenerationError::RemoteFailure(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(classify_http_failure(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::RemoteFailure(format!("invalid JSON payload: {err}"))
    })
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn prediction_failure(prediction: &Value) -> GenerationError {
    let status = prediction_status(prediction);
    let detail = prediction
        .get("error")
        .and_then(Value::as_str)
        .map(|text| truncate_text(text, MAX_DETAIL_CHARS))
        .unwrap_or_else(|| "no error detail".to_string());
    GenerationError::RemoteFailure(format!("prediction {status}: {detail}"))
}

fn transport_failure(endpoint: &str, err: &reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        return GenerationError::RemoteFailure(format!("request to {endpoint} timed out"));
    }
    GenerationError::RemoteFailure(format!("request to {endpoint} failed: {err}"))
}
