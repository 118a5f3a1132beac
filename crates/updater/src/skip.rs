use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Key under which the skip map lives in the config document, persisted as
/// `{version: expiryEpochSeconds}`.
const SKIPPED_VERSIONS_KEY: &str = "skipped_versions";
const SECONDS_PER_DAY: u64 = 86_400;

/// Persistence surface consumed from the configuration collaborator.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value);
    fn save(&self) -> std::io::Result<()>;
}

/// Clock seam so expiry can be driven by simulated time in tests.
pub trait Clock: Send + Sync {
    fn epoch_seconds(&self) -> u64;
}

/// Wall clock used outside of tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

/// Diagnostic view of one skipped version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipEntryInfo {
    pub expires_at: u64,
    pub days_remaining: u64,
    pub is_expired: bool,
}

/// Persisted map of skipped versions with lazy expiry.
///
/// Expired entries are detected and purged on read, never by a background
/// sweep; an expiry observed during [`SkipVersionStore::is_skipped`] is
/// persisted-removed before the call returns, so no later read can observe
/// a stale entry. Mutations go through the config collaborator and are
/// saved immediately.
pub struct SkipVersionStore {
    config: Arc<Mutex<dyn ConfigStore>>,
    clock: Arc<dyn Clock>,
}

impl SkipVersionStore {
    pub fn new(config: Arc<Mutex<dyn ConfigStore>>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<Mutex<dyn ConfigStore>>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    fn load_map(config: &dyn ConfigStore) -> BTreeMap<String, u64> {
        match config.get(SKIPPED_VERSIONS_KEY) {
            Some(Value::Object(map)) => map
                .into_iter()
                .filter_map(|(version, expiry)| expiry.as_u64().map(|e| (version, e)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn store_map(config: &mut dyn ConfigStore, map: &BTreeMap<String, u64>) {
        let value = Value::Object(
            map.iter()
                .map(|(version, expiry)| (version.clone(), Value::from(*expiry)))
                .collect(),
        );
        config.set(SKIPPED_VERSIONS_KEY, value);
        if let Err(err) = config.save() {
            tracing::error!("failed to persist skipped versions: {err}");
        }
    }

    /// Record a skip decision expiring `duration_days` from now; persisted
    /// immediately.
    pub fn skip(&self, version: &str, duration_days: u32) {
        let mut config = self.config.lock().expect("config store lock poisoned");
        let mut map = Self::load_map(&*config);
        let expires_at =
            self.clock.epoch_seconds() + u64::from(duration_days) * SECONDS_PER_DAY;
        map.insert(version.to_string(), expires_at);
        Self::store_map(&mut *config, &map);
        tracing::info!(version, duration_days, "version skipped");
    }

    /// Whether `version` is currently skipped. An entry found expired is
    /// removed and the removal persisted before this returns.
    pub fn is_skipped(&self, version: &str) -> bool {
        let mut config = self.config.lock().expect("config store lock poisoned");
        let mut map = Self::load_map(&*config);
        let Some(expires_at) = map.get(version).copied() else {
            return false;
        };
        if self.clock.epoch_seconds() > expires_at {
            map.remove(version);
            Self::store_map(&mut *config, &map);
            tracing::info!(version, "skip entry expired, removed");
            return false;
        }
        true
    }

    /// Remove one skipped version; returns whether it was present.
    pub fn remove(&self, version: &str) -> bool {
        let mut config = self.config.lock().expect("config store lock poisoned");
        let mut map = Self::load_map(&*config);
        let removed = map.remove(version).is_some();
        if removed {
            Self::store_map(&mut *config, &map);
            tracing::info!(version, "skip entry removed");
        }
        removed
    }

    /// Drop every skip entry.
    pub fn clear_all(&self) {
        let mut config = self.config.lock().expect("config store lock poisoned");
        let count = Self::load_map(&*config).len();
        Self::store_map(&mut *config, &BTreeMap::new());
        tracing::info!(count, "cleared skipped versions");
    }

    /// Diagnostic listing of every persisted entry, including ones already
    /// past their expiry (flagged, not purged — purging happens on
    /// [`SkipVersionStore::is_skipped`]).
    pub fn list_with_metadata(&self) -> BTreeMap<String, SkipEntryInfo> {
        let config = self.config.lock().expect("config store lock poisoned");
        let now = self.clock.epoch_seconds();
        Self::load_map(&*config)
            .into_iter()
            .map(|(version, expires_at)| {
                let info = SkipEntryInfo {
                    expires_at,
                    days_remaining: expires_at.saturating_sub(now) / SECONDS_PER_DAY,
                    is_expired: now > expires_at,
                };
                (version, info)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockConfig {
        values: HashMap<String, Value>,
        saves: AtomicUsize,
    }

    impl ConfigStore for MockConfig {
        fn get(&self, key: &str) -> Option<Value> {
            self.values.get(key).cloned()
        }

        fn set(&mut self, key: &str, value: Value) {
            self.values.insert(key.to_string(), value);
        }

        fn save(&self) -> std::io::Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockClock(AtomicU64);

    impl MockClock {
        fn advance_days(&self, days: u64) {
            self.0.fetch_add(days * SECONDS_PER_DAY, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn epoch_seconds(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn store() -> (SkipVersionStore, Arc<Mutex<MockConfig>>, Arc<MockClock>) {
        let config = Arc::new(Mutex::new(MockConfig::default()));
        let clock = Arc::new(MockClock(AtomicU64::new(1_700_000_000)));
        let store = SkipVersionStore::with_clock(
            config.clone() as Arc<Mutex<dyn ConfigStore>>,
            clock.clone() as Arc<dyn Clock>,
        );
        (store, config, clock)
    }

    fn persisted_map(config: &Arc<Mutex<MockConfig>>) -> BTreeMap<String, u64> {
        let guard = config.lock().expect("mock config lock");
        SkipVersionStore::load_map(&*guard)
    }

    #[test]
    fn skip_then_is_skipped_holds() {
        let (store, config, _clock) = store();
        store.skip("1.9.0", 30);
        assert!(store.is_skipped("1.9.0"));
        assert!(!store.is_skipped("2.0.0"));
        assert!(config.lock().expect("lock").saves.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn expiry_purges_and_persists_the_removal() {
        let (store, config, clock) = store();
        store.skip("1.9.0", 1);
        assert!(store.is_skipped("1.9.0"));

        clock.advance_days(2);
        assert!(!store.is_skipped("1.9.0"));
        // The removal is already on disk: no stale entry for later reads.
        assert!(!persisted_map(&config).contains_key("1.9.0"));
        assert!(store.list_with_metadata().is_empty());
    }

    #[test]
    fn list_reports_expiry_metadata() {
        let (store, _config, clock) = store();
        store.skip("3.0.0", 30);
        store.skip("3.1.0", 1);
        clock.advance_days(2);

        let listing = store.list_with_metadata();
        let fresh = &listing["3.0.0"];
        assert!(!fresh.is_expired);
        assert_eq!(fresh.days_remaining, 28);
        let stale = &listing["3.1.0"];
        assert!(stale.is_expired);
        assert_eq!(stale.days_remaining, 0);
    }

    #[test]
    fn remove_and_clear_all() {
        let (store, config, _clock) = store();
        store.skip("1.0.1", 30);
        store.skip("1.0.2", 30);

        assert!(store.remove("1.0.1"));
        assert!(!store.remove("1.0.1"));
        assert!(store.is_skipped("1.0.2"));

        store.clear_all();
        assert!(!store.is_skipped("1.0.2"));
        assert!(persisted_map(&config).is_empty());
    }

    #[test]
    fn tolerates_corrupt_persisted_shape() {
        let (store, config, _clock) = store();
        config
            .lock()
            .expect("lock")
            .set(SKIPPED_VERSIONS_KEY, Value::from("corrupt"));
        assert!(!store.is_skipped("1.0.0"));
        assert!(store.list_with_metadata().is_empty());
    }
}
