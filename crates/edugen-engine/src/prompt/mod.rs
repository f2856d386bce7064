pub mod envelope;
mod templates;

use anyhow::{bail, Result};
use edugen_contracts::categories::{CategoryCatalog, Frame, Orientation};

pub use envelope::{build_content, compose_generation_instruction, compose_refinement_instruction};

pub const DEFAULT_YEAR_LEVEL: &str = "Year 8";
pub const DEFAULT_AGE: &str = "middle school";
pub const DEFAULT_STYLE: &str = "original";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptOptions {
    pub year_level: Option<String>,
    pub age: Option<String>,
    pub style: Option<String>,
    pub orientation: Option<Orientation>,
}

impl PromptOptions {
    fn year_level(&self) -> &str {
        non_blank(self.year_level.as_deref()).unwrap_or(DEFAULT_YEAR_LEVEL)
    }

    fn age(&self) -> &str {
        non_blank(self.age.as_deref()).unwrap_or(DEFAULT_AGE)
    }

    pub fn style(&self) -> &str {
        non_blank(self.style.as_deref()).unwrap_or(DEFAULT_STYLE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub text: String,
    pub frame: Frame,
}

pub struct PromptBuilder<'a> {
    catalog: &'a CategoryCatalog,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(catalog: &'a CategoryCatalog) -> Self {
        Self { catalog }
    }

    pub fn build(
        &self,
        category: &str,
        user_input: &str,
        options: &PromptOptions,
    ) -> Result<BuiltPrompt> {
        let spec = self.catalog.get(category)?;
        let frame = spec.frame(options.orientation);
        let input = user_input.trim();

        let text = match category {
            "subtopic_cover" => {
                match self.catalog.style_template(category, options.style())? {
                    Some(style_template) => templates::subtopic_styled(
                        input,
                        options.year_level(),
                        style_template,
                        &frame,
                    ),
                    None => templates::subtopic_default(input, options.year_level(), &frame),
                }
            }
            "tutero_ai" => templates::tutero_ai(input, &frame),
            "classroom_activity" => templates::classroom_activity(input, options.age(), &frame),
            "context_introduction" => templates::context_introduction(input, &frame),
            other => bail!("Unknown category: {other}"),
        };

        tracing::debug!(
            category,
            user_input = input,
            prompt_length = text.len(),
            "built prompt"
        );
        Ok(BuiltPrompt { text, frame })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
