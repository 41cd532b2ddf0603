use std::sync::Arc;

use lap_telemetry_core::{Lap, LapId, TelemetryError};
use lap_telemetry_store_sqlite::SqliteTelemetryStore;

/// Name-to-identity resolution and lap lifecycle. The registry owns the
/// consistency contracts both ingestion channels rely on: `create` rejects
/// duplicates, `find_or_create` is the only operation allowed to race with
/// itself, and `delete` is reachable only from the retention sweep.
#[derive(Clone)]
pub struct LapRegistry {
    store: Arc<SqliteTelemetryStore>,
}

impl LapRegistry {
    #[must_use]
    pub fn new(store: Arc<SqliteTelemetryStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] for a blank name and
    /// [`TelemetryError::AlreadyExists`] for a live duplicate.
    pub fn create(&self, name: &str) -> Result<Lap, TelemetryError> {
        self.store.create_lap(name)
    }

    /// # Errors
    /// Returns [`TelemetryError::StorageFailure`] when the lookup fails.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Lap>, TelemetryError> {
        self.store.find_lap_by_name(name)
    }

    /// Race-free upsert: concurrent callers with the same unknown name all
    /// observe one identity.
    ///
    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] for a blank name.
    pub fn find_or_create(&self, name: &str) -> Result<Lap, TelemetryError> {
        self.store.find_or_create_lap(name)
    }

    /// Deletes a lap, cascading to all of its parameters. No user-facing
    /// delete exists; the retention sweeper is the only caller.
    ///
    /// # Errors
    /// Returns [`TelemetryError::NotFound`] when the lap is already gone.
    pub fn delete(&self, lap_id: LapId) -> Result<(), TelemetryError> {
        self.store.delete_lap(lap_id)
    }

    /// # Errors
    /// Returns [`TelemetryError::StorageFailure`] when the listing fails.
    pub fn list(&self) -> Result<Vec<Lap>, TelemetryError> {
        self.store.list_laps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must<T>(result: Result<T, TelemetryError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_registry() -> LapRegistry {
        let store = match SqliteTelemetryStore::open_in_memory() {
            Ok(value) => value,
            Err(err) => panic!("failed to open store: {err}"),
        };
        must(store.migrate());
        LapRegistry::new(Arc::new(store))
    }

    #[test]
    fn create_and_find_agree_on_identity() {
        let registry = fixture_registry();
        let created = must(registry.create("Lap 1"));

        let found = match must(registry.find_by_name("Lap 1")) {
            Some(value) => value,
            None => panic!("expected lap after create"),
        };
        assert_eq!(found.lap_id, created.lap_id);
        assert!(must(registry.find_by_name("Lap 2")).is_none());
    }

    #[test]
    fn delete_makes_the_name_available_again() {
        let registry = fixture_registry();
        let first = must(registry.create("Lap 1"));
        must(registry.delete(first.lap_id));

        let second = must(registry.create("Lap 1"));
        assert_ne!(first.lap_id, second.lap_id);
        assert_eq!(must(registry.list()).len(), 1);
    }
}
