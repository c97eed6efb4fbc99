use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::report::AnalysisReport;
use crate::store::{StoreBackend, StoreError};

pub const HISTORY_KEY: &str = "scanHistory";

/// One persisted scan. Carries the thumbnail data URL, never the
/// full-resolution capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Millisecond creation timestamp, unique within the collection.
    pub id: i64,
    pub created_at: String,
    pub thumbnail: String,
    /// Hex sha256 of the normalized image bytes.
    pub fingerprint: String,
    pub report: AnalysisReport,
}

impl HistoryEntry {
    pub fn new(
        now: DateTime<Utc>,
        thumbnail: String,
        fingerprint: String,
        report: AnalysisReport,
    ) -> Self {
        Self {
            id: now.timestamp_millis(),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            thumbnail,
            fingerprint,
            report,
        }
    }
}

/// Ordered scan history, most recent first. Every mutation persists the
/// whole collection; a mutation whose write fails leaves the in-memory
/// collection exactly as it was before the call.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// A corrupt or missing payload loads as an empty history rather than
    /// failing the session.
    pub fn load(store: &mut dyn StoreBackend) -> Self {
        let entries = store
            .get(HISTORY_KEY)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Prepends the entry and persists. On a failed write the entry is
    /// rolled back and the error surfaces exactly once to the caller.
    pub fn record(
        &mut self,
        store: &mut dyn StoreBackend,
        mut entry: HistoryEntry,
    ) -> Result<(), StoreError> {
        // Same-millisecond scans would collide on the timestamp id.
        while self.entries.iter().any(|item| item.id == entry.id) {
            entry.id += 1;
        }
        let mut candidate = self.entries.clone();
        candidate.insert(0, entry);
        persist(store, &candidate)?;
        self.entries = candidate;
        Ok(())
    }

    pub fn remove(&mut self, store: &mut dyn StoreBackend, id: i64) -> Result<bool, StoreError> {
        let Some(index) = self.entries.iter().position(|item| item.id == id) else {
            return Ok(false);
        };
        let mut candidate = self.entries.clone();
        candidate.remove(index);
        persist(store, &candidate)?;
        self.entries = candidate;
        Ok(true)
    }

    pub fn clear(&mut self, store: &mut dyn StoreBackend) -> Result<(), StoreError> {
        persist(store, &[])?;
        self.entries.clear();
        Ok(())
    }
}

fn persist(store: &mut dyn StoreBackend, entries: &[HistoryEntry]) -> Result<(), StoreError> {
    let value =
        serde_json::to_value(entries).map_err(|err| StoreError::Backend(err.to_string()))?;
    store.set(HISTORY_KEY, value)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use crate::report::{
        AnalysisReport, AncestryMetrics, AncestrySection, ColorComponent, DominantColor,
        HealthIndicator, IrisPattern, RarityIndex, ReportSection,
    };
    use crate::store::{MemoryStore, StoreBackend, StoreError};

    use super::{HistoryEntry, HistoryLog, HISTORY_KEY};

    fn sample_report() -> AnalysisReport {
        let section = |title: &str| ReportSection {
            title: title.to_string(),
            description: format!("{title} description"),
        };
        AnalysisReport {
            ancestry: AncestrySection {
                title: "Northern European Whispers".to_string(),
                description: "Light blue with distinct rings.".to_string(),
                metrics: AncestryMetrics {
                    global_prevalence: "9%".to_string(),
                    regional_hotspots: vec!["Northern Europe".to_string()],
                    genetic_probability: "1:15".to_string(),
                },
            },
            health_clues: section("Sunlight Sensitivity"),
            biometric_signature: section("A Unique Encryption Key"),
            rarity_index: RarityIndex {
                title: "Global Rarity Meter".to_string(),
                percentage: 9,
                description: "Relatively uncommon.".to_string(),
            },
            personality_vibe: section("Strategic Thinker"),
            pigment_oddities: section("Uniform Canvas"),
            health_indicators: vec![HealthIndicator {
                name: "Stress Levels".to_string(),
                description: "Faint concentric rings.".to_string(),
                level: "Moderate".to_string(),
            }],
            unique_patterns: vec![IrisPattern {
                name: "Radiant Crypts".to_string(),
                description: "Spoke-like openings.".to_string(),
            }],
            dominant_color: DominantColor {
                name: "Blue".to_string(),
                confidence: 90,
                hex_code: "#4a90d9".to_string(),
            },
            color_composition: vec![ColorComponent {
                color_name: "Blue".to_string(),
                hex_code: "#4a90d9".to_string(),
                percentage: 100,
            }],
        }
    }

    fn entry_at(millis: i64) -> HistoryEntry {
        let now = Utc.timestamp_millis_opt(millis).unwrap();
        HistoryEntry::new(
            now,
            "data:image/jpeg;base64,AAAA".to_string(),
            "ab".repeat(32),
            sample_report(),
        )
    }

    #[test]
    fn record_prepends_most_recent_first() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::default();
        log.record(&mut store, entry_at(1_000)).expect("record");
        log.record(&mut store, entry_at(2_000)).expect("record");

        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].id, 2_000);
        assert_eq!(log.entries()[1].id, 1_000);
    }

    #[test]
    fn collection_roundtrips_through_store() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::default();
        log.record(&mut store, entry_at(1_000)).expect("record");
        log.record(&mut store, entry_at(2_000)).expect("record");

        let reloaded = HistoryLog::load(&mut store);
        assert_eq!(reloaded.entries(), log.entries());
        assert_eq!(
            reloaded.entries()[0].report.rarity_index.percentage,
            log.entries()[0].report.rarity_index.percentage
        );
    }

    #[test]
    fn same_millisecond_entries_get_distinct_ids() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::default();
        log.record(&mut store, entry_at(5_000)).expect("record");
        log.record(&mut store, entry_at(5_000)).expect("record");

        assert_eq!(log.entries()[0].id, 5_001);
        assert_eq!(log.entries()[1].id, 5_000);
    }

    #[test]
    fn quota_failure_rolls_back_the_new_entry() {
        // Capacity sized so one entry fits and a second does not.
        let mut probe = MemoryStore::new();
        let mut sizing = HistoryLog::default();
        sizing.record(&mut probe, entry_at(1_000)).expect("record");
        let one_entry_len = serde_json::to_string(&probe.get(HISTORY_KEY).unwrap())
            .unwrap()
            .len();

        let mut store = MemoryStore::with_capacity_bytes(one_entry_len + 64);
        let mut log = HistoryLog::default();
        log.record(&mut store, entry_at(1_000)).expect("first fits");

        let err = log
            .record(&mut store, entry_at(2_000))
            .expect_err("second exceeds quota");
        assert!(matches!(err, StoreError::QuotaExceeded));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].id, 1_000);

        let reloaded = HistoryLog::load(&mut store);
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn remove_and_clear_persist() {
        let mut store = MemoryStore::new();
        let mut log = HistoryLog::default();
        log.record(&mut store, entry_at(1_000)).expect("record");
        log.record(&mut store, entry_at(2_000)).expect("record");

        assert!(log.remove(&mut store, 1_000).expect("remove"));
        assert!(!log.remove(&mut store, 1_000).expect("remove again"));
        assert_eq!(HistoryLog::load(&mut store).len(), 1);

        log.clear(&mut store).expect("clear");
        assert!(log.is_empty());
        assert_eq!(store.get(HISTORY_KEY), Some(json!([])));
    }

    #[test]
    fn corrupt_payload_loads_as_empty() {
        let mut store = MemoryStore::new();
        store
            .set(HISTORY_KEY, json!("not an array"))
            .expect("seed corrupt payload");
        let log = HistoryLog::load(&mut store);
        assert!(log.is_empty());
    }
}
