use indexmap::IndexMap;

use crate::errors::GenerationError;
use crate::options::{AgeRange, BackgroundStyle, Expression, FamilyPose, LabeledOption, StyleName};
use crate::results::GenerationKind;
use crate::settings::GenerationSettings;

/// PhotoMaker only conditions on the input faces when this word appears.
pub const TRIGGER_WORD: &str = "img";

pub const AGE_TABLE: &str = "age_range";
pub const EXPRESSION_TABLE: &str = "expression";
pub const POSE_TABLE: &str = "pose";
pub const BACKGROUND_TABLE: &str = "background";
pub const STYLE_TABLE: &str = "style";

/// Phrase tables keyed by option label.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub ages: IndexMap<String, String>,
    pub expressions: IndexMap<String, String>,
    pub poses: IndexMap<String, String>,
    pub backgrounds: IndexMap<String, String>,
    pub styles: IndexMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            ages: table(&[
                (AgeRange::Newborn, "newborn baby (0-3 months old)"),
                (AgeRange::Infant, "infant baby (3-6 months old)"),
                (AgeRange::Baby, "baby (6-12 months old)"),
                (AgeRange::Toddler, "toddler (12-24 months old)"),
            ]),
            expressions: table(&[
                (Expression::Smiling, "with a bright, happy smile"),
                (Expression::Peaceful, "with a peaceful, serene expression"),
                (Expression::Curious, "with curious, alert eyes"),
                (Expression::Laughing, "laughing joyfully"),
                (Expression::Natural, "with a natural, candid expression"),
            ]),
            poses: table(&[
                (FamilyPose::Classic, "classic formal family portrait"),
                (FamilyPose::Casual, "casual, natural family photo"),
                (FamilyPose::Holding, "parents lovingly holding their baby"),
                (FamilyPose::Outdoor, "outdoor family photograph"),
                (FamilyPose::Studio, "professional studio family portrait"),
            ]),
            backgrounds: table(&[
                (BackgroundStyle::WhiteStudio, "clean white studio background"),
                (BackgroundStyle::SoftNeutral, "soft, neutral colored background"),
                (BackgroundStyle::Outdoor, "natural outdoor setting"),
                (BackgroundStyle::Home, "warm, cozy home environment"),
                (BackgroundStyle::ProfessionalStudio, "professional studio setting"),
            ]),
            styles: table(&[
                (
                    StyleName::Photographic,
                    "professional photography, soft natural lighting",
                ),
                (StyleName::Cinematic, "cinematic lighting, film still"),
                (StyleName::DisneyCharacter, "animated character style"),
                (StyleName::DigitalArt, "digital art"),
                (StyleName::FantasyArt, "fantasy art"),
                (StyleName::Neonpunk, "neonpunk style, vibrant neon colors"),
                (StyleName::Enhance, "highly detailed, enhanced"),
                (StyleName::ComicBook, "comic book illustration"),
                (StyleName::Lowpoly, "low poly 3d render"),
                (StyleName::LineArt, "clean line art"),
            ]),
        }
    }
}

fn table<T: LabeledOption>(entries: &[(T, &str)]) -> IndexMap<String, String> {
    entries
        .iter()
        .map(|(option, phrase)| (option.label().to_string(), phrase.to_string()))
        .collect()
}

fn lookup<'a>(
    map: &'a IndexMap<String, String>,
    table: &str,
    key: &str,
) -> Result<&'a str, GenerationError> {
    map.get(key)
        .map(String::as_str)
        .ok_or_else(|| GenerationError::UnknownOption {
            table: table.to_string(),
            key: key.to_string(),
        })
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    templates: PromptTemplates,
}

impl PromptBuilder {
    pub fn new(templates: Option<PromptTemplates>) -> Self {
        Self {
            templates: templates.unwrap_or_default(),
        }
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// Renders the prompt for one of the two session calls.
    pub fn build_prompt(
        &self,
        settings: &GenerationSettings,
        kind: GenerationKind,
    ) -> Result<String, GenerationError> {
        match kind {
            GenerationKind::Baby => self.baby_prompt(settings),
            GenerationKind::Family => self.family_prompt(settings),
        }
    }

    pub fn baby_prompt(&self, settings: &GenerationSettings) -> Result<String, GenerationError> {
        let age = lookup(&self.templates.ages, AGE_TABLE, settings.age_range.label())?;
        let expression = lookup(
            &self.templates.expressions,
            EXPRESSION_TABLE,
            settings.expression.label(),
        )?;
        let background = self.background(settings.background)?;
        let style = self.style(settings.style)?;
        let prompt = format!("a cute {age} {TRIGGER_WORD} {expression}, {background}, {style}");
        Ok(with_extra(prompt, settings.baby_prompt_extra.as_deref()))
    }

    pub fn family_prompt(&self, settings: &GenerationSettings) -> Result<String, GenerationError> {
        let pose = lookup(&self.templates.poses, POSE_TABLE, settings.pose.label())?;
        let background = self.background(settings.background)?;
        let style = self.style(settings.style)?;
        let prompt = format!("a beautiful {pose} with people {TRIGGER_WORD}, {background}, {style}");
        Ok(with_extra(prompt, settings.family_prompt_extra.as_deref()))
    }

    fn background(&self, background: BackgroundStyle) -> Result<&str, GenerationError> {
        lookup(&self.templates.backgrounds, BACKGROUND_TABLE, background.label())
    }

    fn style(&self, style: StyleName) -> Result<&str, GenerationError> {
        lookup(&self.templates.styles, STYLE_TABLE, style.label())
    }
}

fn with_extra(prompt: String, extra: Option<&str>) -> String {
    match extra.map(str::trim).filter(|value| !value.is_empty()) {
        Some(extra) => format!("{prompt}, {extra}"),
        None => prompt,
    }
}
