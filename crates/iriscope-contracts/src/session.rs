use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::store::{StoreBackend, StoreError};

pub const PREMIUM_KEY: &str = "premium";
pub const SCAN_COUNT_KEY: &str = "scanCount";
pub const SCAN_WINDOW_KEY: &str = "lastScanReset";

/// Free scans per rolling window before the upgrade gate engages.
pub const FREE_SCAN_LIMIT: u32 = 5;
pub const SCAN_WINDOW_DAYS: i64 = 7;

/// Mutable per-user session state backed by the key/value store.
///
/// Every mutation writes through to the store so the persisted values and
/// the in-memory view never drift. The scan counter lives in a rolling
/// seven-day window; loading or refreshing past the window end resets the
/// counter and restarts the window at the current instant.
#[derive(Debug, Clone)]
pub struct SessionState {
    premium: bool,
    scans_used: u32,
    window_started_at: DateTime<Utc>,
}

impl SessionState {
    pub fn load(store: &mut dyn StoreBackend, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let premium = store
            .get(PREMIUM_KEY)
            .and_then(|value| value.as_bool())
            .unwrap_or(false);
        let scans_used = store
            .get(SCAN_COUNT_KEY)
            .and_then(|value| value.as_u64())
            .unwrap_or(0) as u32;
        let window_millis = store.get(SCAN_WINDOW_KEY).and_then(|value| value.as_i64());
        let window_started_at = window_millis
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(now);

        let mut state = Self {
            premium,
            scans_used,
            window_started_at,
        };
        if window_millis.is_none() {
            store.set(SCAN_WINDOW_KEY, json!(now.timestamp_millis()))?;
        }
        state.refresh_window(store, now)?;
        Ok(state)
    }

    /// Resets the counter when the window has lapsed. Returns whether a
    /// reset happened.
    pub fn refresh_window(
        &mut self,
        store: &mut dyn StoreBackend,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if now - self.window_started_at <= Duration::days(SCAN_WINDOW_DAYS) {
            return Ok(false);
        }
        self.scans_used = 0;
        self.window_started_at = now;
        store.set(SCAN_COUNT_KEY, json!(0))?;
        store.set(SCAN_WINDOW_KEY, json!(now.timestamp_millis()))?;
        Ok(true)
    }

    pub fn premium(&self) -> bool {
        self.premium
    }

    pub fn scans_used(&self) -> u32 {
        self.scans_used
    }

    pub fn window_started_at(&self) -> DateTime<Utc> {
        self.window_started_at
    }

    /// Remaining free scans in this window; `None` for premium sessions.
    pub fn scans_left(&self) -> Option<u32> {
        if self.premium {
            None
        } else {
            Some(FREE_SCAN_LIMIT.saturating_sub(self.scans_used))
        }
    }

    pub fn can_scan(&self) -> bool {
        self.premium || self.scans_used < FREE_SCAN_LIMIT
    }

    /// Premium sessions do not consume scans.
    pub fn record_scan(&mut self, store: &mut dyn StoreBackend) -> Result<(), StoreError> {
        if self.premium {
            return Ok(());
        }
        self.scans_used += 1;
        store.set(SCAN_COUNT_KEY, json!(self.scans_used))
    }

    pub fn set_premium(
        &mut self,
        store: &mut dyn StoreBackend,
        enabled: bool,
    ) -> Result<(), StoreError> {
        self.premium = enabled;
        store.set(PREMIUM_KEY, json!(enabled))
    }
}
