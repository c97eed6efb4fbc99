use indexmap::IndexMap;
use serde_json::Value;

use iriscope_contracts::report::AnalysisReport;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Str,
    /// Integer in 0..=100.
    Percent,
    StringArray,
}

#[derive(Debug, Clone, Copy)]
enum SectionKind {
    Object(&'static [(&'static str, FieldKind)]),
    Array(&'static [(&'static str, FieldKind)]),
    /// Title/description plus the nested metrics object.
    Ancestry,
}

const TITLED: &[(&str, FieldKind)] = &[
    ("title", FieldKind::Str),
    ("description", FieldKind::Str),
];
const METRICS: &[(&str, FieldKind)] = &[
    ("globalPrevalence", FieldKind::Str),
    ("regionalHotspots", FieldKind::StringArray),
    ("geneticProbability", FieldKind::Str),
];
const RARITY: &[(&str, FieldKind)] = &[
    ("title", FieldKind::Str),
    ("percentage", FieldKind::Percent),
    ("description", FieldKind::Str),
];
const INDICATOR: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Str),
    ("description", FieldKind::Str),
    ("level", FieldKind::Str),
];
const PATTERN: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Str),
    ("description", FieldKind::Str),
];
const DOMINANT: &[(&str, FieldKind)] = &[
    ("name", FieldKind::Str),
    ("confidence", FieldKind::Percent),
    ("hexCode", FieldKind::Str),
];
const COMPOSITION: &[(&str, FieldKind)] = &[
    ("colorName", FieldKind::Str),
    ("hexCode", FieldKind::Str),
    ("percentage", FieldKind::Percent),
];

/// Required sections in wire order; the first violation encountered in this
/// order is the one the error names.
fn required_sections() -> IndexMap<&'static str, SectionKind> {
    IndexMap::from([
        ("ancestry", SectionKind::Ancestry),
        ("healthClues", SectionKind::Object(TITLED)),
        ("biometricSignature", SectionKind::Object(TITLED)),
        ("rarityIndex", SectionKind::Object(RARITY)),
        ("personalityVibe", SectionKind::Object(TITLED)),
        ("pigmentOddities", SectionKind::Object(TITLED)),
        ("healthIndicators", SectionKind::Array(INDICATOR)),
        ("uniquePatterns", SectionKind::Array(PATTERN)),
        ("dominantColor", SectionKind::Object(DOMINANT)),
        ("colorComposition", SectionKind::Array(COMPOSITION)),
    ])
}

/// Verifies presence and primitive-type conformance of every required
/// section and nested field, then hands back the typed report. The payload
/// passes through unchanged; only its shape is judged.
pub fn validate_report(payload: &Value) -> Result<AnalysisReport, PipelineError> {
    let root = payload
        .as_object()
        .ok_or_else(|| violation("response root must be a JSON object"))?;

    for (name, kind) in required_sections() {
        let section = root
            .get(name)
            .ok_or_else(|| violation(&format!("missing required section '{name}'")))?;
        match kind {
            SectionKind::Object(fields) => check_object(name, section, fields)?,
            SectionKind::Array(fields) => {
                let rows = section
                    .as_array()
                    .ok_or_else(|| violation(&format!("'{name}' must be an array")))?;
                for (idx, row) in rows.iter().enumerate() {
                    check_object(&format!("{name}[{idx}]"), row, fields)?;
                }
            }
            SectionKind::Ancestry => {
                check_object(name, section, TITLED)?;
                let metrics = section
                    .get("metrics")
                    .ok_or_else(|| violation("missing required field 'ancestry.metrics'"))?;
                check_object("ancestry.metrics", metrics, METRICS)?;
            }
        }
    }

    serde_json::from_value(payload.clone())
        .map_err(|err| violation(&format!("response failed to deserialize: {err}")))
}

fn check_object(
    path: &str,
    value: &Value,
    fields: &[(&str, FieldKind)],
) -> Result<(), PipelineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| violation(&format!("'{path}' must be an object")))?;
    for (field, kind) in fields {
        let item = obj
            .get(*field)
            .ok_or_else(|| violation(&format!("missing required field '{path}.{field}'")))?;
        match kind {
            FieldKind::Str => {
                if !item.is_string() {
                    return Err(violation(&format!("'{path}.{field}' must be a string")));
                }
            }
            FieldKind::Percent => {
                let in_range = item.as_u64().map(|n| n <= 100).unwrap_or(false);
                if !in_range {
                    return Err(violation(&format!(
                        "'{path}.{field}' must be an integer between 0 and 100"
                    )));
                }
            }
            FieldKind::StringArray => {
                let all_strings = item
                    .as_array()
                    .map(|rows| rows.iter().all(Value::is_string))
                    .unwrap_or(false);
                if !all_strings {
                    return Err(violation(&format!(
                        "'{path}.{field}' must be an array of strings"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn violation(detail: &str) -> PipelineError {
    PipelineError::SchemaViolation(detail.to_string())
}

/// Schema-complete fixture shared by the validator and orchestrator tests.
#[cfg(test)]
pub(crate) fn sample_payload() -> Value {
    serde_json::json!({
        "ancestry": {
            "title": "Northern European Whispers",
            "description": "Light blue with distinct rings.",
            "metrics": {
                "globalPrevalence": "9%",
                "regionalHotspots": ["Northern Europe"],
                "geneticProbability": "1:15"
            }
        },
        "healthClues": {"title": "Sunlight Sensitivity", "description": "Wear sunglasses."},
        "biometricSignature": {"title": "A Unique Encryption Key", "description": "Unique to you."},
        "rarityIndex": {"title": "Global Rarity Meter", "percentage": 9, "description": "Uncommon."},
        "personalityVibe": {"title": "Strategic Thinker", "description": "Charming."},
        "pigmentOddities": {"title": "Uniform Canvas", "description": "Even pigment."},
        "healthIndicators": [
            {"name": "Stress Levels", "description": "Faint rings.", "level": "Moderate"}
        ],
        "uniquePatterns": [
            {"name": "Radiant Crypts", "description": "Spoke-like openings."}
        ],
        "dominantColor": {"name": "Blue", "confidence": 88, "hexCode": "#4a90d9"},
        "colorComposition": [
            {"colorName": "Blue", "hexCode": "#4a90d9", "percentage": 60},
            {"colorName": "Grey", "hexCode": "#8a93a0", "percentage": 40}
        ]
    })
}
