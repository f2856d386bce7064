//! Prompt assembly, provider calls and the generation controller for
//! educational images.

pub mod generator;
pub mod imaging;
pub mod prompt;
pub mod providers;
pub mod references;
pub mod validate;

mod util;

pub use generator::{
    GenerationObserver, GenerationRequest, GenerationResult, Generator, GeneratorConfig,
    HistoryTarget, NoopObserver, RefineRequest,
};
pub use prompt::{BuiltPrompt, PromptBuilder, PromptOptions};
pub use providers::{api_key_error, ApiKeyError, ImageProvider, ImageProviderRegistry};
pub use util::ImageBytes;
pub use validate::ImageValidator;
