mod bounds;

pub use bounds::{ParameterBounds, ParameterPolicy};

use crate::errors::GenerationError;
use crate::settings::{GenerationSettings, SettingsInput};

pub const IDENTITY_STRENGTH: &str = "identity_strength";
pub const STEPS: &str = "steps";
pub const GUIDANCE_SCALE: &str = "guidance_scale";
pub const NUM_OUTPUTS: &str = "num_outputs";
pub const SEED: &str = "seed";

pub const MIN_IDENTITY_STRENGTH: i64 = 15;
pub const MAX_IDENTITY_STRENGTH: i64 = 50;
pub const DEFAULT_IDENTITY_STRENGTH: i64 = 25;

pub const MIN_STEPS: i64 = 20;
pub const MAX_STEPS: i64 = 100;
pub const DEFAULT_STEPS: i64 = 50;

pub const MIN_GUIDANCE_SCALE: f64 = 1.0;
pub const MAX_GUIDANCE_SCALE: f64 = 10.0;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 5.0;

pub const MIN_NUM_OUTPUTS: i64 = 1;
pub const MAX_NUM_OUTPUTS: i64 = 4;
pub const DEFAULT_NUM_OUTPUTS: i64 = 1;

pub const MAX_SEED: i64 = 2_147_483_647;

/// Clamps every numeric field with the default policy table.
pub fn clamp(settings: &GenerationSettings) -> GenerationSettings {
    ParameterPolicy::default().clamp(settings)
}

/// Validates option labels and clamps numbers with the default policy table.
pub fn resolve(input: &SettingsInput) -> Result<GenerationSettings, GenerationError> {
    ParameterPolicy::default().resolve(input)
}
