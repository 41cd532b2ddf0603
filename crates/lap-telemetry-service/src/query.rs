use std::sync::Arc;

use lap_telemetry_core::{Lap, Parameter, TelemetryError};
use lap_telemetry_store_sqlite::SqliteTelemetryStore;

/// Read-only access to a lap's parameters. An empty result is reported as
/// a distinct not-found condition rather than returned as an empty success.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<SqliteTelemetryStore>,
}

impl QueryService {
    #[must_use]
    pub fn new(store: Arc<SqliteTelemetryStore>) -> Self {
        Self { store }
    }

    /// All values recorded for one key, `added_at` ascending.
    ///
    /// # Errors
    /// Returns [`TelemetryError::NotFound`] when the lap is absent, or —
    /// with a distinct message — when no reading matches the key.
    pub fn parameter_values(
        &self,
        lap_name: &str,
        key: &str,
    ) -> Result<Vec<Parameter>, TelemetryError> {
        let lap = self.resolve(lap_name)?;
        let matches = self.store.list_parameters_by_key(lap.lap_id, key)?;

        if matches.is_empty() {
            return Err(TelemetryError::NotFound(format!(
                "parameter with key [{key}] not found in this lap"
            )));
        }
        Ok(matches)
    }

    /// Every parameter of the lap, `added_at` ascending.
    ///
    /// # Errors
    /// Returns [`TelemetryError::NotFound`] when the lap is absent or holds
    /// no parameters.
    pub fn all_parameters(&self, lap_name: &str) -> Result<Vec<Parameter>, TelemetryError> {
        let lap = self.resolve(lap_name)?;
        let parameters = self.store.list_parameters(lap.lap_id)?;

        if parameters.is_empty() {
            return Err(TelemetryError::NotFound(
                "no parameters found for this lap".to_string(),
            ));
        }
        Ok(parameters)
    }

    fn resolve(&self, lap_name: &str) -> Result<Lap, TelemetryError> {
        self.store
            .find_lap_by_name(lap_name)?
            .ok_or_else(|| TelemetryError::NotFound(format!("lap not found: {lap_name}")))
    }
}
