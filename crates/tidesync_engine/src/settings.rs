//! Engine settings persisted in the reserved config table.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tidesync_query::{format_datetime, parse_datetime};
use tidesync_store::{LocalStore, SystemProperties};

use crate::error::SyncResult;

const DELTA_TOKEN_PREFIX: &str = "deltaToken";
const SYSTEM_PROPERTIES_PREFIX: &str = "systemProperties";

/// Typed access to the key-value settings the engine keeps per table.
///
/// Delta tokens are stored as RFC 3339 text under a key scoped to the
/// (table, query key) pair, so independent incremental queries over the
/// same table advance independently.
pub struct SyncSettings {
    store: Arc<dyn LocalStore>,
}

impl SyncSettings {
    /// Wraps an initialized store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    fn delta_token_key(table_name: &str, query_key: &str) -> String {
        format!("{DELTA_TOKEN_PREFIX}|{table_name}|{query_key}")
    }

    /// The high-water mark for an incremental query; the epoch when none
    /// has been recorded yet.
    pub fn delta_token(&self, table_name: &str, query_key: &str) -> SyncResult<DateTime<Utc>> {
        let stored = self
            .store
            .read_setting(&Self::delta_token_key(table_name, query_key))?;
        Ok(stored
            .as_deref()
            .and_then(parse_datetime)
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()))
    }

    /// Durably advances the high-water mark.
    pub fn set_delta_token(
        &self,
        table_name: &str,
        query_key: &str,
        token: DateTime<Utc>,
    ) -> SyncResult<()> {
        self.store.write_setting(
            &Self::delta_token_key(table_name, query_key),
            &format_datetime(token),
        )?;
        Ok(())
    }

    /// Forgets the high-water mark; the next incremental pull starts over.
    pub fn reset_delta_token(&self, table_name: &str, query_key: &str) -> SyncResult<()> {
        self.store
            .delete_setting(&Self::delta_token_key(table_name, query_key))?;
        Ok(())
    }

    /// The system-property columns a table declared at definition time.
    pub fn system_properties(&self, table_name: &str) -> SyncResult<SystemProperties> {
        let stored = self
            .store
            .read_setting(&format!("{SYSTEM_PROPERTIES_PREFIX}|{table_name}"))?;
        Ok(stored
            .and_then(|bits| bits.parse().ok())
            .map(SystemProperties::from_bits)
            .unwrap_or(SystemProperties::NONE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_query::{system, Item};
    use tidesync_store::SqliteStore;

    fn settings() -> SyncSettings {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .define_table(
                "todo",
                &Item::new()
                    .with(system::ID, "")
                    .with(system::UPDATED_AT, Utc::now()),
            )
            .unwrap();
        store.initialize().unwrap();
        SyncSettings::new(Arc::new(store))
    }

    #[test]
    fn missing_token_defaults_to_epoch() {
        let settings = settings();
        let token = settings.delta_token("todo", "all").unwrap();
        assert_eq!(token, Utc.timestamp_opt(0, 0).unwrap());
    }

    #[test]
    fn tokens_are_scoped_per_table_and_query_key() {
        let settings = settings();
        let mark = Utc.timestamp_millis_opt(1_400_000_000_500).single().unwrap();
        settings.set_delta_token("todo", "mine", mark).unwrap();

        assert_eq!(settings.delta_token("todo", "mine").unwrap(), mark);
        assert_eq!(
            settings.delta_token("todo", "all").unwrap(),
            Utc.timestamp_opt(0, 0).unwrap()
        );

        settings.reset_delta_token("todo", "mine").unwrap();
        assert_eq!(
            settings.delta_token("todo", "mine").unwrap(),
            Utc.timestamp_opt(0, 0).unwrap()
        );
    }

    #[test]
    fn system_properties_reflect_the_table_definition() {
        let settings = settings();
        let mask = settings.system_properties("todo").unwrap();
        assert!(mask.contains(SystemProperties::UPDATED_AT));
        // the store adds a version column to every defined table
        assert!(mask.contains(SystemProperties::VERSION));
        assert!(!mask.contains(SystemProperties::DELETED));
        assert_eq!(
            settings.system_properties("unknown").unwrap(),
            SystemProperties::NONE
        );
    }
}
