use indexmap::IndexMap;

use crate::errors::GenerationError;
use crate::options::{AgeRange, BackgroundStyle, Expression, FamilyPose, LabeledOption, StyleName};
use crate::settings::{GenerationSettings, SettingsInput};

use super::{
    DEFAULT_GUIDANCE_SCALE, DEFAULT_IDENTITY_STRENGTH, DEFAULT_NUM_OUTPUTS, DEFAULT_STEPS,
    GUIDANCE_SCALE, IDENTITY_STRENGTH, MAX_GUIDANCE_SCALE, MAX_IDENTITY_STRENGTH,
    MAX_NUM_OUTPUTS, MAX_SEED, MAX_STEPS, MIN_GUIDANCE_SCALE, MIN_IDENTITY_STRENGTH,
    MIN_NUM_OUTPUTS, MIN_STEPS, NUM_OUTPUTS, SEED, STEPS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBounds {
    pub name: String,
    pub remote_key: String,
    pub min: f64,
    pub max: f64,
    pub default: Option<f64>,
    pub integer: bool,
    pub help: String,
}

impl ParameterBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn clamp_int(&self, value: i64) -> i64 {
        value.max(self.min as i64).min(self.max as i64)
    }

    fn clamp_float(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.default.unwrap_or(self.min);
        }
        value.max(self.min).min(self.max)
    }

    /// Swaps an inverted range and pulls the default inside it.
    fn normalized(mut self) -> Self {
        if self.min > self.max {
            std::mem::swap(&mut self.min, &mut self.max);
        }
        self.default = self.default.map(|value| self.clamp_float(value));
        self
    }
}

/// The accepted range of every numeric control, keyed by control name.
///
/// Bounds are a contract with one PhotoMaker version; a new model version
/// needs its own table.
#[derive(Debug, Clone)]
pub struct ParameterPolicy {
    bounds: IndexMap<String, ParameterBounds>,
}

impl Default for ParameterPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ParameterPolicy {
    pub fn new(bounds: Option<IndexMap<String, ParameterBounds>>) -> Self {
        let bounds = bounds
            .unwrap_or_else(default_bounds)
            .into_iter()
            .map(|(name, bounds)| (name, bounds.normalized()))
            .collect();
        Self { bounds }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterBounds> {
        self.bounds.get(name)
    }

    pub fn bounds(&self) -> impl Iterator<Item = &ParameterBounds> {
        self.bounds.values()
    }

    /// Forces every numeric field into its accepted range.
    ///
    /// Total and idempotent. Controls missing from the table pass through.
    pub fn clamp(&self, settings: &GenerationSettings) -> GenerationSettings {
        let mut out = settings.clone();
        if let Some(bounds) = self.get(IDENTITY_STRENGTH) {
            out.identity_strength = bounds.clamp_int(out.identity_strength);
        }
        if let Some(bounds) = self.get(STEPS) {
            out.steps = bounds.clamp_int(out.steps);
        }
        if let Some(bounds) = self.get(GUIDANCE_SCALE) {
            out.guidance_scale = bounds.clamp_float(out.guidance_scale);
        }
        if let Some(bounds) = self.get(NUM_OUTPUTS) {
            out.num_outputs = bounds.clamp_int(out.num_outputs);
        }
        if let Some(bounds) = self.get(SEED) {
            // Negative seeds follow the "-1 means random" convention.
            out.seed = out
                .seed
                .filter(|seed| *seed >= 0)
                .map(|seed| bounds.clamp_int(seed));
        }
        out
    }

    pub fn resolve(&self, input: &SettingsInput) -> Result<GenerationSettings, GenerationError> {
        let defaults = GenerationSettings::default();
        let settings = GenerationSettings {
            style: parse_or::<StyleName>(input.style.as_deref(), defaults.style)?,
            age_range: parse_or::<AgeRange>(input.age_range.as_deref(), defaults.age_range)?,
            expression: parse_or::<Expression>(input.expression.as_deref(), defaults.expression)?,
            pose: parse_or::<FamilyPose>(input.pose.as_deref(), defaults.pose)?,
            background: parse_or::<BackgroundStyle>(
                input.background.as_deref(),
                defaults.background,
            )?,
            identity_strength: input
                .identity_strength
                .unwrap_or(defaults.identity_strength),
            steps: input.steps.unwrap_or(defaults.steps),
            guidance_scale: input.guidance_scale.unwrap_or(defaults.guidance_scale),
            seed: input.seed,
            num_outputs: input.num_outputs.unwrap_or(defaults.num_outputs),
            safety_checker: input.safety_checker.unwrap_or(defaults.safety_checker),
            baby_prompt_extra: non_blank(input.baby_prompt_extra.as_deref()),
            family_prompt_extra: non_blank(input.family_prompt_extra.as_deref()),
        };
        Ok(self.clamp(&settings))
    }
}

fn parse_or<T: LabeledOption>(raw: Option<&str>, default: T) -> Result<T, GenerationError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => T::parse_label(value),
        None => Ok(default),
    }
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn default_bounds() -> IndexMap<String, ParameterBounds> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      remote_key: &str,
                      min: f64,
                      max: f64,
                      default: Option<f64>,
                      integer: bool,
                      help: &str| {
        map.insert(
            name.to_string(),
            ParameterBounds {
                name: name.to_string(),
                remote_key: remote_key.to_string(),
                min,
                max,
                default,
                integer,
                help: help.to_string(),
            },
        );
    };

    insert(
        IDENTITY_STRENGTH,
        "style_strength_ratio",
        MIN_IDENTITY_STRENGTH as f64,
        MAX_IDENTITY_STRENGTH as f64,
        Some(DEFAULT_IDENTITY_STRENGTH as f64),
        true,
        "lower keeps more parent features, higher allows more artistic freedom",
    );
    insert(
        STEPS,
        "num_steps",
        MIN_STEPS as f64,
        MAX_STEPS as f64,
        Some(DEFAULT_STEPS as f64),
        true,
        "more steps give higher quality but slower generation",
    );
    insert(
        GUIDANCE_SCALE,
        "guidance_scale",
        MIN_GUIDANCE_SCALE,
        MAX_GUIDANCE_SCALE,
        Some(DEFAULT_GUIDANCE_SCALE),
        false,
        "how literally the prompt is followed",
    );
    insert(
        NUM_OUTPUTS,
        "num_outputs",
        MIN_NUM_OUTPUTS as f64,
        MAX_NUM_OUTPUTS as f64,
        Some(DEFAULT_NUM_OUTPUTS as f64),
        true,
        "baby variations per session; each one is billed",
    );
    insert(
        SEED,
        "seed",
        0.0,
        MAX_SEED as f64,
        None,
        true,
        "fixed seed for reproducible results; omit or pass -1 for random",
    );

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(policy: &ParameterPolicy, name: &str, value: f64) -> bool {
        policy.get(name).map(|b| b.contains(value)).unwrap_or(false)
    }

    #[test]
    fn clamp_forces_every_numeric_field_into_range() {
        let policy = ParameterPolicy::default();
        let samples: [(i64, f64); 7] = [
            (i64::MIN, f64::MIN),
            (-1, -0.5),
            (0, 0.0),
            (17, 1.5),
            (60, 9.5),
            (1000, 11.0),
            (i64::MAX, f64::MAX),
        ];
        for (int_value, float_value) in samples {
            let settings = GenerationSettings {
                identity_strength: int_value,
                steps: int_value,
                guidance_scale: float_value,
                num_outputs: int_value,
                seed: Some(int_value),
                ..GenerationSettings::default()
            };
            let clamped = policy.clamp(&settings);
            assert!(in_range(&policy, IDENTITY_STRENGTH, clamped.identity_strength as f64));
            assert!(in_range(&policy, STEPS, clamped.steps as f64));
            assert!(in_range(&policy, GUIDANCE_SCALE, clamped.guidance_scale));
            assert!(in_range(&policy, NUM_OUTPUTS, clamped.num_outputs as f64));
            if let Some(seed) = clamped.seed {
                assert!(in_range(&policy, SEED, seed as f64));
            }
            assert_eq!(policy.clamp(&clamped), clamped);
        }
    }

    #[test]
    fn clamp_keeps_in_range_values() {
        let settings = GenerationSettings::default()
            .with_identity_strength(25)
            .with_steps(40)
            .with_seed(42);
        assert_eq!(super::super::clamp(&settings), settings);
    }

    #[test]
    fn clamp_maps_edges() {
        let settings = GenerationSettings {
            identity_strength: 5,
            steps: 500,
            guidance_scale: 0.2,
            num_outputs: 9,
            seed: Some(MAX_SEED + 10),
            ..GenerationSettings::default()
        };
        let clamped = super::super::clamp(&settings);
        assert_eq!(clamped.identity_strength, MIN_IDENTITY_STRENGTH);
        assert_eq!(clamped.steps, MAX_STEPS);
        assert_eq!(clamped.guidance_scale, MIN_GUIDANCE_SCALE);
        assert_eq!(clamped.num_outputs, MAX_NUM_OUTPUTS);
        assert_eq!(clamped.seed, Some(MAX_SEED));
    }

    #[test]
    fn inverted_custom_bounds_are_normalized() {
        let mut table = default_bounds();
        if let Some(steps) = table.get_mut(STEPS) {
            steps.min = 80.0;
            steps.max = 30.0;
            steps.default = Some(200.0);
        }
        let policy = ParameterPolicy::new(Some(table));
        let Some(steps) = policy.get(STEPS) else {
            panic!("steps bounds present");
        };
        assert_eq!((steps.min, steps.max), (30.0, 80.0));
        assert_eq!(steps.default, Some(80.0));

        let low = policy.clamp(&GenerationSettings::default().with_steps(1));
        let high = policy.clamp(&GenerationSettings::default().with_steps(500));
        assert_eq!(low.steps, 30);
        assert_eq!(high.steps, 80);
    }

    #[test]
    fn negative_seed_means_random() {
        let settings = GenerationSettings::default().with_seed(-1);
        assert_eq!(super::super::clamp(&settings).seed, None);
    }

    #[test]
    fn non_finite_guidance_falls_back_to_default() {
        let settings = GenerationSettings {
            guidance_scale: f64::NAN,
            ..GenerationSettings::default()
        };
        assert_eq!(
            super::super::clamp(&settings).guidance_scale,
            DEFAULT_GUIDANCE_SCALE
        );
    }

    #[test]
    fn resolve_applies_defaults_and_parses_labels() -> anyhow::Result<()> {
        let input = SettingsInput {
            style: Some("Cinematic".to_string()),
            age_range: Some("newborn".to_string()),
            steps: Some(5),
            baby_prompt_extra: Some("   ".to_string()),
            family_prompt_extra: Some(" in a park ".to_string()),
            ..SettingsInput::default()
        };
        let settings = super::super::resolve(&input)?;
        assert_eq!(settings.style, StyleName::Cinematic);
        assert_eq!(settings.age_range, AgeRange::Newborn);
        assert_eq!(settings.expression, Expression::Smiling);
        assert_eq!(settings.steps, MIN_STEPS);
        assert_eq!(settings.identity_strength, DEFAULT_IDENTITY_STRENGTH);
        assert_eq!(settings.baby_prompt_extra, None);
        assert_eq!(settings.family_prompt_extra.as_deref(), Some("in a park"));
        assert!(settings.safety_checker);
        Ok(())
    }

    #[test]
    fn resolve_rejects_unknown_option() {
        let input = SettingsInput {
            pose: Some("Handstand".to_string()),
            ..SettingsInput::default()
        };
        let err = super::super::resolve(&input).unwrap_err();
        assert_eq!(
            err,
            GenerationError::InvalidOption {
                field: "pose".to_string(),
                value: "Handstand".to_string(),
            }
        );
    }

    #[test]
    fn custom_table_without_entry_passes_value_through() {
        let mut bounds = default_bounds();
        bounds.shift_remove(STEPS);
        let policy = ParameterPolicy::new(Some(bounds));
        let settings = GenerationSettings::default().with_steps(500);
        assert_eq!(policy.clamp(&settings).steps, 500);
        assert_eq!(policy.bounds().count(), 4);
    }
}
