use crate::{
    error::{AppError, AppResult},
    imaging::parse_output_size,
    models::{EditIntent, EditKind, EditOptions, LightingOptions},
};

const EDITOR_PREAMBLE: &str = "As an expert photo editor, apply the following changes to the provided image while preserving everything that is not mentioned and keeping the result photorealistic.";
const MASK_NOTE: &str = "A black and white mask is attached: only change the area marked in white and leave the black area exactly as it is.";
const DEFAULT_LABEL: &str = "Generated Image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    MirrorHorizontal,
    MirrorVertical,
    RotateClockwise,
    RotateCounterClockwise,
}

/// Builds the model instruction and the history label from one set of options.
pub fn compose(options: &EditOptions) -> AppResult<EditIntent> {
    let prompt = options.prompt.trim();
    if options.masked && prompt.is_empty() {
        return Err(AppError::msg("a text prompt is required for masked edits"));
    }

    let mut parts: Vec<String> = Vec::new();
    let mut label = if prompt.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        prompt.to_string()
    };
    if !prompt.is_empty() {
        parts.push(sentence(prompt));
    }

    if let Some(action) = non_empty(options.quick_action.as_deref()) {
        parts.push(format!("Apply the \"{action}\" treatment to the whole scene."));
        label = format!("Quick Action: {action}");
    }

    if let Some(style) = options.style.as_ref().filter(|s| !s.name.trim().is_empty()) {
        let intensity = style.intensity.min(100);
        let mut text = format!(
            "Change the style to {}. Apply this style with an intensity of {intensity}%.",
            style.name.trim()
        );
        if let Some(description) = non_empty(style.description.as_deref()) {
            text.push(' ');
            text.push_str(&sentence(description));
        }
        parts.push(text);
        label = format!("Style: {} ({intensity}%)", style.name.trim());
    }

    let backgrounds = non_empty_items(&options.backgrounds);
    if !backgrounds.is_empty() {
        parts.push(format!("Replace the background with {}.", backgrounds.join(" and ")));
        label.push_str(&format!(", BG: {}", backgrounds.join(", ")));
    }

    let foregrounds = non_empty_items(&options.foregrounds);
    if !foregrounds.is_empty() {
        parts.push(format!("Add {} to the foreground.", foregrounds.join(" and ")));
        label.push_str(&format!(", FG: {}", foregrounds.join(", ")));
    }

    let angle = non_empty(options.camera_angle.as_deref());
    if let Some(angle) = angle {
        parts.push(format!(
            "Re-render the scene from a {angle} camera angle, keeping the architecture identical."
        ));
        label.push_str(&format!(", Angle: {angle}"));
    }

    if let Some(lighting) = options.lighting {
        parts.push(lighting_sentence(lighting));
        label.push_str(", Lights: On");
    }

    if parts.is_empty() {
        return Err(AppError::msg("an edit instruction is required"));
    }

    let kind = if options.style.is_some() {
        EditKind::StyleEdit
    } else if angle.is_some() && prompt.is_empty() && options.quick_action.is_none() {
        EditKind::CameraAngle
    } else {
        EditKind::FreeFormEdit
    };

    let output_size = options
        .output_size
        .as_deref()
        .filter(|value| !value.trim().is_empty() && !value.eq_ignore_ascii_case("original"))
        .map(parse_output_size)
        .transpose()?;

    Ok(EditIntent {
        instruction: finish(&parts.join(" "), options.masked),
        label,
        kind,
        masked: options.masked,
        output_size,
    })
}

pub fn upscale_intent() -> EditIntent {
    canned(
        EditKind::Upscale,
        "Upscale this image 2x. Increase resolution and sharpen fine detail without changing the content, composition or colors.",
        "Upscaled",
    )
}

pub fn variation_intent() -> EditIntent {
    canned(
        EditKind::Variation,
        "Create a subtle variation of this image: keep the subject and composition but vary small details, materials and lighting.",
        "Variation",
    )
}

pub fn transform_intent(transform: Transform) -> EditIntent {
    let (instruction, label) = match transform {
        Transform::MirrorHorizontal => (
            "Mirror the entire image horizontally (left becomes right). Change nothing else.",
            "Mirrored Horizontally",
        ),
        Transform::MirrorVertical => (
            "Flip the entire image vertically (top becomes bottom). Change nothing else.",
            "Flipped Vertically",
        ),
        Transform::RotateClockwise => (
            "Rotate the entire image 90 degrees clockwise. Change nothing else.",
            "Rotated Clockwise",
        ),
        Transform::RotateCounterClockwise => (
            "Rotate the entire image 90 degrees counter-clockwise. Change nothing else.",
            "Rotated Counter-Clockwise",
        ),
    };
    canned(EditKind::Transform, instruction, label)
}

fn canned(kind: EditKind, instruction: &str, label: &str) -> EditIntent {
    EditIntent {
        instruction: finish(instruction, false),
        label: label.to_string(),
        kind,
        masked: false,
        output_size: None,
    }
}

fn finish(body: &str, masked: bool) -> String {
    let mut instruction = format!("{EDITOR_PREAMBLE} {body}");
    if masked {
        instruction.push(' ');
        instruction.push_str(MASK_NOTE);
    }
    instruction
}

fn lighting_sentence(lighting: LightingOptions) -> String {
    let brightness = if lighting.brightness > 75 {
        "very bright and vibrant"
    } else if lighting.brightness > 40 {
        "balanced and welcoming"
    } else {
        "soft and atmospheric"
    };
    let color = if lighting.temperature > 75 {
        "cool daylight white"
    } else if lighting.temperature > 40 {
        "neutral white"
    } else {
        "warm golden"
    };

    format!(
        "Turn on the building's interior and exterior lights. The lighting intensity should be {brightness}. The light color temperature should be {color}."
    )
}

fn sentence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.ends_with(|c: char| matches!(c, '.' | '!' | '?')) {
        trimmed.to_string()
    } else {
        format!("{trimmed}.")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn non_empty_items(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect()
}
