//! Data model shared by the babymaker engine and CLI.

pub mod errors;
pub mod events;
pub mod options;
pub mod policy;
pub mod prompts;
pub mod request;
pub mod results;
pub mod settings;

pub use errors::GenerationError;
pub use request::{GenerationRequest, ImageSource};
pub use results::{GenerationKind, GenerationResult, SessionOutcome};
pub use settings::{GenerationSettings, SettingsInput};
