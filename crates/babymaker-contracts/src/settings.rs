use serde::{Deserialize, Serialize};

use crate::options::{AgeRange, BackgroundStyle, Expression, FamilyPose, StyleName};
use crate::policy;

/// Settings exactly as a form or the command line produced them.
///
/// Labels are unchecked strings and numbers may be out of range; run them
/// through [`crate::policy::ParameterPolicy::resolve`] before use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsInput {
    pub style: Option<String>,
    pub age_range: Option<String>,
    pub expression: Option<String>,
    pub pose: Option<String>,
    pub background: Option<String>,
    pub identity_strength: Option<i64>,
    pub steps: Option<i64>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
    pub num_outputs: Option<i64>,
    pub safety_checker: Option<bool>,
    pub baby_prompt_extra: Option<String>,
    pub family_prompt_extra: Option<String>,
}

/// Typed settings for one session. Numeric fields are only guaranteed to be
/// in range after [`crate::policy::clamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub style: StyleName,
    pub age_range: AgeRange,
    pub expression: Expression,
    pub pose: FamilyPose,
    pub background: BackgroundStyle,
    /// Lower keeps more of the parents' features.
    pub identity_strength: i64,
    pub steps: i64,
    pub guidance_scale: f64,
    /// `None` picks a random seed per session.
    pub seed: Option<i64>,
    pub num_outputs: i64,
    pub safety_checker: bool,
    pub baby_prompt_extra: Option<String>,
    pub family_prompt_extra: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            style: StyleName::default(),
            age_range: AgeRange::default(),
            expression: Expression::default(),
            pose: FamilyPose::default(),
            background: BackgroundStyle::default(),
            identity_strength: policy::DEFAULT_IDENTITY_STRENGTH,
            steps: policy::DEFAULT_STEPS,
            guidance_scale: policy::DEFAULT_GUIDANCE_SCALE,
            seed: None,
            num_outputs: policy::DEFAULT_NUM_OUTPUTS,
            safety_checker: true,
            baby_prompt_extra: None,
            family_prompt_extra: None,
        }
    }
}

impl GenerationSettings {
    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_identity_strength(mut self, value: i64) -> Self {
        self.identity_strength = value;
        self
    }

    pub fn with_steps(mut self, value: i64) -> Self {
        self.steps = value;
        self
    }

    pub fn with_num_outputs(mut self, value: i64) -> Self {
        self.num_outputs = value;
        self
    }
}
