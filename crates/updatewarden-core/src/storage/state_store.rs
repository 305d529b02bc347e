//! Deferral state persisted per policy identifier.
//!
//! Each field lives under its own key so partially written stores from older
//! versions still load. Loading never fails: unreadable or malformed values
//! fall back to their defaults with a warning, since a lost deferral count is
//! recoverable but a run that refuses to start is not.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kv::PersistentKv;
use crate::error::StoreError;
use crate::platform::EpochSecs;

const KEY_DEFERRAL_COUNT: &str = "deferral_count";
const KEY_NEXT_REMINDER_TIME: &str = "next_reminder_time";
const KEY_TIMES_IGNORED: &str = "times_ignored";
const KEY_FORCE_UPDATE_START_TIME: &str = "force_update_start_time";
const KEY_LAST_RUN_TIME: &str = "last_run_time";
const KEY_ASSERTION_ENCOUNTERS: &str = "assertion_encounters";

/// Mutable per-policy state, read once and written once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferralState {
    /// Postponements consumed after the end date.
    pub deferral_count: u32,
    /// No dialog is shown before this instant.
    pub next_reminder_time: Option<EpochSecs>,
    /// Dialogs that timed out or were quit without an answer.
    pub times_ignored: u32,
    /// When the forced GUI hand-off started.
    pub force_update_start_time: Option<EpochSecs>,
    pub last_run_time: Option<EpochSecs>,
    /// Runs skipped because a display-sleep assertion was held.
    pub assertion_encounters: u32,
}

/// Typed access to [`DeferralState`] over a [`PersistentKv`].
pub struct DeferralStateStore<K: PersistentKv> {
    kv: K,
}

impl<K: PersistentKv> DeferralStateStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Underlying key-value store.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Read the state for `policy_id`. Absent keys take their defaults.
    pub fn load(&self, policy_id: &str) -> DeferralState {
        let state = DeferralState {
            deferral_count: self.read_or_default(policy_id, KEY_DEFERRAL_COUNT),
            next_reminder_time: self.read_optional(policy_id, KEY_NEXT_REMINDER_TIME),
            times_ignored: self.read_or_default(policy_id, KEY_TIMES_IGNORED),
            force_update_start_time: self.read_optional(policy_id, KEY_FORCE_UPDATE_START_TIME),
            last_run_time: self.read_optional(policy_id, KEY_LAST_RUN_TIME),
            assertion_encounters: self.read_or_default(policy_id, KEY_ASSERTION_ENCOUNTERS),
        };
        debug!(policy_id, ?state, "loaded deferral state");
        state
    }

    /// Write every field in one batch. `None` fields are removed.
    pub fn save(&self, policy_id: &str, state: &DeferralState) -> Result<(), StoreError> {
        let entries = [
            (KEY_DEFERRAL_COUNT, Some(state.deferral_count.to_string())),
            (
                KEY_NEXT_REMINDER_TIME,
                state.next_reminder_time.map(|t| t.to_string()),
            ),
            (KEY_TIMES_IGNORED, Some(state.times_ignored.to_string())),
            (
                KEY_FORCE_UPDATE_START_TIME,
                state.force_update_start_time.map(|t| t.to_string()),
            ),
            (KEY_LAST_RUN_TIME, state.last_run_time.map(|t| t.to_string())),
            (
                KEY_ASSERTION_ENCOUNTERS,
                Some(state.assertion_encounters.to_string()),
            ),
        ];
        self.kv.write_batch(policy_id, &entries)?;
        debug!(policy_id, ?state, "saved deferral state");
        Ok(())
    }

    /// Forget everything stored for `policy_id`.
    pub fn reset(&self, policy_id: &str) -> Result<(), StoreError> {
        self.kv.clear(policy_id)?;
        debug!(policy_id, "reset deferral state");
        Ok(())
    }

    /// Bump the assertion counter without touching any other field.
    pub fn record_assertion_encounter(&self, policy_id: &str) -> Result<u32, StoreError> {
        let count = self
            .read_or_default::<u32>(policy_id, KEY_ASSERTION_ENCOUNTERS)
            .saturating_add(1);
        self.kv
            .write(policy_id, KEY_ASSERTION_ENCOUNTERS, &count.to_string())?;
        Ok(count)
    }

    fn read_optional<T: std::str::FromStr>(&self, policy_id: &str, key: &str) -> Option<T> {
        let raw = match self.kv.read(policy_id, key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(policy_id, key, error = %e, "failed to read state, using default");
                return None;
            }
        };
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(policy_id, key, value = %raw, "malformed state value, using default");
                None
            }
        }
    }

    fn read_or_default<T: std::str::FromStr + Default>(&self, policy_id: &str, key: &str) -> T {
        self.read_optional(policy_id, key).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryKv, SqliteKv};
    use proptest::prelude::*;

    const POLICY: &str = "com.example.osupdate";

    #[test]
    fn fresh_store_loads_defaults() {
        let store = DeferralStateStore::new(MemoryKv::new());
        assert_eq!(store.load(POLICY), DeferralState::default());
    }

    #[test]
    fn full_state_round_trips() {
        let store = DeferralStateStore::new(SqliteKv::open_in_memory().unwrap());
        let state = DeferralState {
            deferral_count: 2,
            next_reminder_time: Some(1_700_003_600),
            times_ignored: 4,
            force_update_start_time: Some(1_700_000_000),
            last_run_time: Some(1_699_999_000),
            assertion_encounters: 1,
        };
        store.save(POLICY, &state).unwrap();
        assert_eq!(store.load(POLICY), state);
    }

    #[test]
    fn saving_none_removes_previous_value() {
        let store = DeferralStateStore::new(MemoryKv::new());
        let mut state = DeferralState {
            next_reminder_time: Some(500),
            ..Default::default()
        };
        store.save(POLICY, &state).unwrap();

        state.next_reminder_time = None;
        store.save(POLICY, &state).unwrap();
        assert!(store.kv().read(POLICY, "next_reminder_time").unwrap().is_none());
        assert_eq!(store.load(POLICY), state);
    }

    #[test]
    fn malformed_values_fall_back_to_default() {
        let kv = MemoryKv::new();
        kv.write(POLICY, "deferral_count", "three").unwrap();
        kv.write(POLICY, "times_ignored", "2").unwrap();
        kv.write(POLICY, "next_reminder_time", "").unwrap();
        let store = DeferralStateStore::new(kv);

        let state = store.load(POLICY);
        assert_eq!(state.deferral_count, 0);
        assert_eq!(state.times_ignored, 2);
        assert_eq!(state.next_reminder_time, None);
    }

    #[test]
    fn reset_clears_only_that_policy() {
        let store = DeferralStateStore::new(MemoryKv::new());
        let state = DeferralState {
            deferral_count: 1,
            ..Default::default()
        };
        store.save(POLICY, &state).unwrap();
        store.save("other", &state).unwrap();

        store.reset(POLICY).unwrap();
        assert_eq!(store.load(POLICY), DeferralState::default());
        assert_eq!(store.load("other").deferral_count, 1);
    }

    #[test]
    fn assertion_counter_leaves_other_fields_alone() {
        let store = DeferralStateStore::new(MemoryKv::new());
        let state = DeferralState {
            deferral_count: 2,
            next_reminder_time: Some(42),
            ..Default::default()
        };
        store.save(POLICY, &state).unwrap();

        assert_eq!(store.record_assertion_encounter(POLICY).unwrap(), 1);
        assert_eq!(store.record_assertion_encounter(POLICY).unwrap(), 2);

        let loaded = store.load(POLICY);
        assert_eq!(loaded.deferral_count, 2);
        assert_eq!(loaded.next_reminder_time, Some(42));
        assert_eq!(loaded.assertion_encounters, 2);
    }

    #[test]
    fn default_state_round_trips() {
        let store = DeferralStateStore::new(SqliteKv::open_in_memory().unwrap());
        store
            .save(
                POLICY,
                &DeferralState {
                    deferral_count: 2,
                    next_reminder_time: Some(10),
                    ..Default::default()
                },
            )
            .unwrap();

        store.save(POLICY, &DeferralState::default()).unwrap();
        assert_eq!(store.load(POLICY), DeferralState::default());
    }

    fn arb_state() -> impl Strategy<Value = DeferralState> {
        (
            any::<u32>(),
            proptest::option::of(any::<i64>()),
            any::<u32>(),
            proptest::option::of(any::<i64>()),
            proptest::option::of(any::<i64>()),
            any::<u32>(),
        )
            .prop_map(
                |(
                    deferral_count,
                    next_reminder_time,
                    times_ignored,
                    force_update_start_time,
                    last_run_time,
                    assertion_encounters,
                )| DeferralState {
                    deferral_count,
                    next_reminder_time,
                    times_ignored,
                    force_update_start_time,
                    last_run_time,
                    assertion_encounters,
                },
            )
    }

    proptest! {
        #[test]
        fn any_state_round_trips(first in arb_state(), second in arb_state()) {
            let store = DeferralStateStore::new(SqliteKv::open_in_memory().unwrap());
            store.save(POLICY, &first).unwrap();
            prop_assert_eq!(store.load(POLICY), first);

            // Overwriting must also drop fields that became absent.
            store.save(POLICY, &second).unwrap();
            prop_assert_eq!(store.load(POLICY), second);
        }
    }
}
