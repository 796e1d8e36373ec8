use std::io::Cursor;

use babymaker_contracts::errors::GenerationError;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Map};
use sha2::{Digest, Sha256};

use super::{GenerationCall, GenerationClient, GenerationOutput, ImageBytes};

const SCHEME: &str = "dryrun://";
const SIZE: u32 = 64;

/// Offline client: no network, solid-colour PNGs.
///
/// URLs look like `dryrun://baby/1a2b3c/00.png`; the hex segment is the
/// colour, taken from a SHA-256 of prompt and seed.
#[derive(Debug, Default, Clone)]
pub struct DryrunClient;

impl DryrunClient {
    pub fn new() -> Self {
        Self
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, call: &GenerationCall) -> Result<GenerationOutput, GenerationError> {
        let (r, g, b) = color_from_prompt(&call.prompt, call.seed);
        let color = hex::encode([r, g, b]);
        let urls = (0..call.num_outputs.max(1))
            .map(|idx| format!("{SCHEME}{}/{color}/{idx:02}.png", call.kind))
            .collect();

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), json!("dryrun"));
        provider_request.insert(
            "payload".to_string(),
            json!({
                "prompt": call.prompt,
                "seed": call.seed,
                "num_outputs": call.num_outputs,
                "images": call.images.len(),
            }),
        );
        Ok(GenerationOutput {
            urls,
            prediction_id: Some(format!("dryrun-{}-{color}", call.kind)),
            seed_used: Some(call.seed),
            provider_request,
            warnings: Vec::new(),
        })
    }

    fn download(&self, url: &str) -> Result<ImageBytes, GenerationError> {
        let color = url
            .strip_prefix(SCHEME)
            .and_then(|rest| rest.split('/').nth(1))
            .and_then(|segment| hex::decode(segment).ok())
            .filter(|bytes| bytes.len() == 3)
            .ok_or_else(|| {
                GenerationError::StorageFailure(format!("not a dry-run image URL: {url}"))
            })?;
        let bytes = render_png(Rgb([color[0], color[1], color[2]]))?;
        Ok(ImageBytes::new(bytes, Some("image/png".to_string())))
    }
}

fn render_png(color: Rgb<u8>) -> Result<Vec<u8>, GenerationError> {
    let image = RgbImage::from_pixel(SIZE, SIZE, color);
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| GenerationError::StorageFailure(format!("png encode failed: {err}")))?;
    Ok(out.into_inner())
}

fn color_from_prompt(prompt: &str, seed: i64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
