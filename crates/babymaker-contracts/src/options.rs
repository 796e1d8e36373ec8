use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

/// A closed set of choices offered to the user.
///
/// `label` is the exact text the remote model or the prompt tables expect;
/// `key` is a short spelling accepted on the command line.
pub trait LabeledOption: Copy + PartialEq + std::fmt::Debug + Sized + 'static {
    const FIELD: &'static str;

    fn all() -> &'static [Self];
    fn label(self) -> &'static str;
    fn key(self) -> &'static str;

    fn parse_label(raw: &str) -> Result<Self, GenerationError> {
        let wanted = raw.trim();
        Self::all()
            .iter()
            .copied()
            .find(|option| {
                option.label().eq_ignore_ascii_case(wanted)
                    || option.key().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| GenerationError::InvalidOption {
                field: Self::FIELD.to_string(),
                value: raw.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StyleName {
    #[default]
    #[serde(rename = "Photographic (Default)")]
    Photographic,
    #[serde(rename = "Cinematic")]
    Cinematic,
    // Spelling matches the model's own style list.
    #[serde(rename = "Disney Charactor")]
    DisneyCharacter,
    #[serde(rename = "Digital Art")]
    DigitalArt,
    #[serde(rename = "Fantasy art")]
    FantasyArt,
    #[serde(rename = "Neonpunk")]
    Neonpunk,
    #[serde(rename = "Enhance")]
    Enhance,
    #[serde(rename = "Comic book")]
    ComicBook,
    #[serde(rename = "Lowpoly")]
    Lowpoly,
    #[serde(rename = "Line art")]
    LineArt,
}

impl LabeledOption for StyleName {
    const FIELD: &'static str = "style";

    fn all() -> &'static [Self] {
        &[
            Self::Photographic,
            Self::Cinematic,
            Self::DisneyCharacter,
            Self::DigitalArt,
            Self::FantasyArt,
            Self::Neonpunk,
            Self::Enhance,
            Self::ComicBook,
            Self::Lowpoly,
            Self::LineArt,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::Photographic => "Photographic (Default)",
            Self::Cinematic => "Cinematic",
            Self::DisneyCharacter => "Disney Charactor",
            Self::DigitalArt => "Digital Art",
            Self::FantasyArt => "Fantasy art",
            Self::Neonpunk => "Neonpunk",
            Self::Enhance => "Enhance",
            Self::ComicBook => "Comic book",
            Self::Lowpoly => "Lowpoly",
            Self::LineArt => "Line art",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Photographic => "photographic",
            Self::Cinematic => "cinematic",
            Self::DisneyCharacter => "disney",
            Self::DigitalArt => "digital-art",
            Self::FantasyArt => "fantasy",
            Self::Neonpunk => "neonpunk",
            Self::Enhance => "enhance",
            Self::ComicBook => "comic",
            Self::Lowpoly => "lowpoly",
            Self::LineArt => "line-art",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgeRange {
    #[serde(rename = "Newborn (0-3 months)")]
    Newborn,
    #[serde(rename = "Infant (3-6 months)")]
    Infant,
    #[default]
    #[serde(rename = "Baby (6-12 months)")]
    Baby,
    #[serde(rename = "Toddler (12-24 months)")]
    Toddler,
}

impl LabeledOption for AgeRange {
    const FIELD: &'static str = "age_range";

    fn all() -> &'static [Self] {
        &[Self::Newborn, Self::Infant, Self::Baby, Self::Toddler]
    }

    fn label(self) -> &'static str {
        match self {
            Self::Newborn => "Newborn (0-3 months)",
            Self::Infant => "Infant (3-6 months)",
            Self::Baby => "Baby (6-12 months)",
            Self::Toddler => "Toddler (12-24 months)",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Newborn => "newborn",
            Self::Infant => "infant",
            Self::Baby => "baby",
            Self::Toddler => "toddler",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Expression {
    #[default]
    #[serde(rename = "Smiling")]
    Smiling,
    #[serde(rename = "Peaceful/Sleeping")]
    Peaceful,
    #[serde(rename = "Curious/Alert")]
    Curious,
    #[serde(rename = "Laughing")]
    Laughing,
    #[serde(rename = "Natural/Candid")]
    Natural,
}

impl LabeledOption for Expression {
    const FIELD: &'static str = "expression";

    fn all() -> &'static [Self] {
        &[
            Self::Smiling,
            Self::Peaceful,
            Self::Curious,
            Self::Laughing,
            Self::Natural,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::Smiling => "Smiling",
            Self::Peaceful => "Peaceful/Sleeping",
            Self::Curious => "Curious/Alert",
            Self::Laughing => "Laughing",
            Self::Natural => "Natural/Candid",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Smiling => "smiling",
            Self::Peaceful => "peaceful",
            Self::Curious => "curious",
            Self::Laughing => "laughing",
            Self::Natural => "natural",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FamilyPose {
    #[serde(rename = "Classic Portrait (formal)")]
    Classic,
    #[default]
    #[serde(rename = "Casual & Natural")]
    Casual,
    #[serde(rename = "Parents holding baby")]
    Holding,
    #[serde(rename = "Outdoor family shot")]
    Outdoor,
    #[serde(rename = "Studio portrait")]
    Studio,
}

impl LabeledOption for FamilyPose {
    const FIELD: &'static str = "pose";

    fn all() -> &'static [Self] {
        &[
            Self::Classic,
            Self::Casual,
            Self::Holding,
            Self::Outdoor,
            Self::Studio,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::Classic => "Classic Portrait (formal)",
            Self::Casual => "Casual & Natural",
            Self::Holding => "Parents holding baby",
            Self::Outdoor => "Outdoor family shot",
            Self::Studio => "Studio portrait",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Casual => "casual",
            Self::Holding => "holding",
            Self::Outdoor => "outdoor",
            Self::Studio => "studio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackgroundStyle {
    #[default]
    #[serde(rename = "Clean white studio")]
    WhiteStudio,
    #[serde(rename = "Soft neutral colors")]
    SoftNeutral,
    #[serde(rename = "Natural outdoor setting")]
    Outdoor,
    #[serde(rename = "Warm home environment")]
    Home,
    #[serde(rename = "Professional studio")]
    ProfessionalStudio,
}

impl LabeledOption for BackgroundStyle {
    const FIELD: &'static str = "background";

    fn all() -> &'static [Self] {
        &[
            Self::WhiteStudio,
            Self::SoftNeutral,
            Self::Outdoor,
            Self::Home,
            Self::ProfessionalStudio,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::WhiteStudio => "Clean white studio",
            Self::SoftNeutral => "Soft neutral colors",
            Self::Outdoor => "Natural outdoor setting",
            Self::Home => "Warm home environment",
            Self::ProfessionalStudio => "Professional studio",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::WhiteStudio => "white-studio",
            Self::SoftNeutral => "neutral",
            Self::Outdoor => "outdoor",
            Self::Home => "home",
            Self::ProfessionalStudio => "pro-studio",
        }
    }
}
