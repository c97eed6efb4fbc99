use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::media::NormalizedImage;

/// A sound JPEG of any real iris crop is comfortably larger than this; a
/// shorter payload means the normalizer produced garbage (seen with
/// screenshots and exotic mobile formats).
pub const MIN_PAYLOAD_BYTES: usize = 500;

/// Instruction text sent alongside the image part. Fixed for every request;
/// the schema descriptor constrains the shape, this constrains the content.
pub const ANALYSIS_INSTRUCTION: &str = "\
Analyze the iris in this high-quality image. Your analysis MUST be based only on the visible \
iris color and pattern; do not analyze the pupil, sclera, retina, or any surrounding skin or \
eyelashes. Your tone must be engaging, fun, and educational. Do NOT provide any medical \
advice; this is for entertainment. \
For the ancestry section include a metrics object with plausible-sounding values for \
globalPrevalence, regionalHotspots, and geneticProbability. \
Identify 1-3 unique iris patterns such as Concentric Rings, Radiant Furrows, or Crypts of \
Fuchs, with a fun explanation for each. \
Determine the dominant color (with a 0-100 confidence score and hex code) and a breakdown of \
the color composition (top 3-4 colors with names, hex codes, and percentages). \
Identify 2-4 non-medical health indicators based on common iridology patterns (stress rings, \
radial furrows), each framed as a fun observation with a name, a cautious description, and a \
level of Low, Moderate, High, or Normal. \
Fill out every field in the provided JSON schema with creative and relevant content.";

/// The outbound request: one binary image part, one text part, and the
/// declarative schema descriptor the service must shape its output to.
/// Immutable once built; one request maps to one attempt sequence.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: ImagePart,
    pub instruction: &'static str,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct ImagePart {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Assembles the request from a normalized image. Rejecting an absent or
/// implausibly small payload here saves a guaranteed-wasted round trip.
pub fn build_request(image: &NormalizedImage) -> Result<AnalysisRequest, PipelineError> {
    if image.bytes.len() < MIN_PAYLOAD_BYTES {
        return Err(PipelineError::MissingPayload);
    }
    Ok(AnalysisRequest {
        image: ImagePart {
            bytes: image.bytes.clone(),
            mime_type: image.mime_type.to_string(),
        },
        instruction: ANALYSIS_INSTRUCTION,
        schema: analysis_schema(),
    })
}

fn string_prop(description: &str) -> Value {
    json!({"type": "STRING", "description": description})
}

fn percent_prop(description: &str) -> Value {
    json!({"type": "INTEGER", "description": description})
}

fn titled_section(title_desc: &str, body_desc: &str) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "title": string_prop(title_desc),
            "description": string_prop(body_desc),
        },
        "required": ["title", "description"],
    })
}

/// Response-schema descriptor enumerating every required section and field
/// with its primitive type, in the OpenAPI subset the service accepts.
pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "ancestry": {
                "type": "OBJECT",
                "properties": {
                    "title": string_prop("A creative title for the ancestry guess."),
                    "description": string_prop(
                        "A 1-2 sentence fun guess about likely ancestral regions based on iris \
                         color and patterns."
                    ),
                    "metrics": {
                        "type": "OBJECT",
                        "description": "Fun, plausible-sounding metrics for the ancestry guess.",
                        "properties": {
                            "globalPrevalence": string_prop(
                                "Estimated global prevalence as a percentage string, e.g. '9%'."
                            ),
                            "regionalHotspots": {
                                "type": "ARRAY",
                                "items": string_prop("A likely regional hotspot."),
                                "description": "1-2 likely regional hotspots.",
                            },
                            "geneticProbability": string_prop(
                                "A fun, fictional genetic probability ratio, e.g. '1:15'."
                            ),
                        },
                        "required": ["globalPrevalence", "regionalHotspots", "geneticProbability"],
                    },
                },
                "required": ["title", "description", "metrics"],
            },
            "healthClues": titled_section(
                "A creative title for health risk clues.",
                "A 1-2 sentence non-medical note on UV sensitivity based only on eye color."
            ),
            "biometricSignature": titled_section(
                "A creative title for the biometric signature.",
                "A 1-2 sentence comment on the uniqueness of the iris as an identifier."
            ),
            "rarityIndex": {
                "type": "OBJECT",
                "properties": {
                    "title": string_prop("A creative title for the rarity index."),
                    "percentage": percent_prop(
                        "An integer from 1 to 100 for how common this eye color is globally \
                         (1 = very rare, 100 = very common)."
                    ),
                    "description": string_prop(
                        "A 1-2 sentence explanation of the rarity of this color-pattern \
                         combination."
                    ),
                },
                "required": ["title", "percentage", "description"],
            },
            "personalityVibe": titled_section(
                "A fun, pseudoscience-based personality label.",
                "A 1-2 sentence lighthearted personality trait for this eye color."
            ),
            "pigmentOddities": titled_section(
                "A title for pigment oddities found, or for the uniformity.",
                "A 1-2 sentence note on traits like central heterochromia, rings, or freckles."
            ),
            "healthIndicators": {
                "type": "ARRAY",
                "description": "2-4 non-medical, entertainment-only indicators from common \
                                iridology patterns. Absolutely no medical advice.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": string_prop("The indicator name, e.g. 'Stress Levels'."),
                        "description": string_prop("A 1-2 sentence cautious, fun observation."),
                        "level": string_prop("One of Low, Moderate, High, or Normal."),
                    },
                    "required": ["name", "description", "level"],
                },
            },
            "uniquePatterns": {
                "type": "ARRAY",
                "description": "1-3 unique structural patterns detected in the iris.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": string_prop("The pattern name, e.g. 'Radiant Crypts'."),
                        "description": string_prop("A short, fun explanation of the pattern."),
                    },
                    "required": ["name", "description"],
                },
            },
            "dominantColor": {
                "type": "OBJECT",
                "properties": {
                    "name": string_prop("The primary eye color name, e.g. 'Blue-Green'."),
                    "confidence": percent_prop("A 0-100 confidence score for the dominant color."),
                    "hexCode": string_prop("The hex code for the dominant color."),
                },
                "required": ["name", "confidence", "hexCode"],
            },
            "colorComposition": {
                "type": "ARRAY",
                "description": "The top 3-4 colors found in the iris.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "colorName": string_prop("Name of the color component."),
                        "hexCode": string_prop("The hex code for the color."),
                        "percentage": percent_prop("The percentage of this color, 0-100."),
                    },
                    "required": ["colorName", "hexCode", "percentage"],
                },
            },
        },
        "required": [
            "ancestry", "healthClues", "biometricSignature", "rarityIndex", "personalityVibe",
            "pigmentOddities", "healthIndicators", "uniquePatterns", "dominantColor",
            "colorComposition"
        ],
    })
}
