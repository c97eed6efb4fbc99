use serde::{Deserialize, Serialize};

/// One titled paragraph of the report (health clues, personality vibe, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AncestryMetrics {
    pub global_prevalence: String,
    pub regional_hotspots: Vec<String>,
    pub genetic_probability: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncestrySection {
    pub title: String,
    pub description: String,
    pub metrics: AncestryMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RarityIndex {
    pub title: String,
    /// How common the eye color is globally; 1 = very rare, 100 = very common.
    pub percentage: u8,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicator {
    pub name: String,
    pub description: String,
    /// Qualitative level: "Low", "Moderate", "High" or "Normal".
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrisPattern {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantColor {
    pub name: String,
    pub confidence: u8,
    pub hex_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorComponent {
    pub color_name: String,
    pub hex_code: String,
    pub percentage: u8,
}

/// The full interpretive report returned by the analysis service.
///
/// Field names follow the wire format (camelCase) so a validated response
/// payload deserializes without renaming, and a persisted history entry
/// round-trips byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub ancestry: AncestrySection,
    pub health_clues: ReportSection,
    pub biometric_signature: ReportSection,
    pub rarity_index: RarityIndex,
    pub personality_vibe: ReportSection,
    pub pigment_oddities: ReportSection,
    pub health_indicators: Vec<HealthIndicator>,
    pub unique_patterns: Vec<IrisPattern>,
    pub dominant_color: DominantColor,
    pub color_composition: Vec<ColorComponent>,
}
