//! Final instruction text and message content for a provider call.
//!
//! The category prompt is wrapped in one of several envelopes depending on
//! which reference images travel with the request. Character-copy rules only
//! appear when system references are attached, user references get their own
//! section, and the fixed-resolution rule is always present.

use serde_json::{json, Value};

pub fn compose_generation_instruction(
    prompt: &str,
    has_system_refs: bool,
    has_user_refs: bool,
    width: u32,
    height: u32,
) -> String {
    if !has_system_refs && !has_user_refs {
        return format!(
            "Generate an image in EXACTLY {width}x{height} resolution based on the following request: \"{prompt}\". The scene must be fully composed for this aspect ratio."
        );
    }

    let mut text = String::from("CRITICAL INSTRUCTIONS: \n");
    if has_system_refs {
        text.push_str(
            "
1. CHARACTER DESIGN: The provided system images show the EXACT character design you MUST use.
   - COPY the character's appearance EXACTLY from these reference images
   - EXACT same body shape, proportions, colors, facial features, and design details
   - DO NOT create a new character or modify the design
",
        );
    }
    if has_user_refs {
        text.push_str(
            "
2. USER REFERENCES: The provided user images are for additional context or style inspiration as requested in the prompt.
",
        );
    }
    text.push_str(&format!(
        r#"
3. RESOLUTION & ASPECT RATIO: The image MUST be generated in EXACTLY {width}x{height} resolution.
   - This is NON-NEGOTIABLE
   - The composition MUST be optimized for this {width}x{height} frame
   - Do NOT use a square frame and crop it; generate the full {width}x{height} scene

Now generate an image based on this request: "{prompt}"

Remember:
- Character design is FIXED (shown in reference images)
- Size is FIXED at {width}x{height}
- Only the scene/context should be new"#
    ));
    text
}

pub fn compose_refinement_instruction(instructions: &str, has_system_refs: bool) -> String {
    if !has_system_refs {
        return format!(
            "Refine the provided image according to these instructions: \"{instructions}\". Maintain the same style, quality, and aspect ratio."
        );
    }
    format!(
        r#"CRITICAL INSTRUCTION: The first images show the EXACT character design you MUST use. The last image is the base image to refine.

You must COPY the character's appearance EXACTLY from the reference images:
- EXACT same body shape and proportions
- EXACT same colors (as shown in reference images)
- EXACT same facial features (as shown in reference images)
- EXACT same design details (as shown in reference images)

Now refine the base image (last image) according to these instructions: "{instructions}"

CRITICAL:
- Keep the character design EXACTLY as shown in the reference images
- Maintain the EXACT aspect ratio and dimensions of the original image
- Only modify the scene/context as requested"#
    )
}

/// Chat content parts: system references, user references, the base image
/// when refining, then the instruction text.
pub fn build_content(
    system_refs: &[String],
    user_refs: &[String],
    base_image: Option<&str>,
    instruction: &str,
) -> Vec<Value> {
    let mut content: Vec<Value> = system_refs
        .iter()
        .chain(user_refs.iter())
        .map(String::as_str)
        .chain(base_image)
        .map(|url| {
            json!({
                "type": "image_url",
                "image_url": { "url": url }
            })
        })
        .collect();
    content.push(json!({
        "type": "text",
        "text": instruction,
    }));
    content
}
