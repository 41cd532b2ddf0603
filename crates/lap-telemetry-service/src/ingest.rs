use std::sync::Arc;

use lap_telemetry_core::{
    validate_lap_name, LapId, Reading, RegisterRequest, TelemetryError, TelemetrySubmission,
};
use lap_telemetry_store_sqlite::SqliteTelemetryStore;
use serde::Serialize;

use crate::registry::LapRegistry;

/// Acknowledgement returned by a request/response registration.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct RegisterReceipt {
    pub lap_id: LapId,
    pub stored: usize,
}

/// Funnel for both ingestion channels. The request/response path demands a
/// pre-existing lap and surfaces every failure; the streaming path creates
/// unknown laps silently and never reports an error to the sender.
#[derive(Clone)]
pub struct IngestGateway {
    registry: LapRegistry,
    store: Arc<SqliteTelemetryStore>,
}

impl IngestGateway {
    #[must_use]
    pub fn new(store: Arc<SqliteTelemetryStore>) -> Self {
        Self {
            registry: LapRegistry::new(Arc::clone(&store)),
            store,
        }
    }

    /// Request/response ingestion: the lap must already exist, and the
    /// readings map must have been shaped by the boundary layer (no
    /// metadata fields inside it).
    ///
    /// # Errors
    /// Returns [`TelemetryError::InvalidArgument`] for a blank lap name or
    /// empty readings and [`TelemetryError::NotFound`] for an unknown lap;
    /// no implicit creation happens on this path.
    pub fn register(&self, request: &RegisterRequest) -> Result<RegisterReceipt, TelemetryError> {
        validate_lap_name(&request.lap_name)?;
        if request.parameters.is_empty() {
            return Err(TelemetryError::InvalidArgument(
                "readings must not be empty".to_string(),
            ));
        }

        let lap = self
            .registry
            .find_by_name(&request.lap_name)?
            .ok_or_else(|| {
                TelemetryError::NotFound(format!("lap not found: {}", request.lap_name))
            })?;

        let readings = Reading::from_map(&request.parameters);
        let stored = self.store.append_parameters(lap.lap_id, &readings)?;

        Ok(RegisterReceipt {
            lap_id: lap.lap_id,
            stored: stored.len(),
        })
    }

    /// Streaming ingestion: fire-and-forget. Malformed submissions are
    /// dropped with a logged warning, and an unknown lap name creates the
    /// lap instead of failing — the channel has no response path.
    pub fn submit(&self, submission: &TelemetrySubmission) {
        let Some(lap_name) = submission
            .lap_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
        else {
            tracing::warn!("dropping streamed telemetry without a lap name");
            return;
        };

        let Some(parameters) = submission.parameters.as_ref().filter(|map| !map.is_empty()) else {
            tracing::warn!(lap_name, "dropping streamed telemetry without readings");
            return;
        };

        let readings = Reading::from_map(parameters);
        if let Err(err) = self.store_streamed(lap_name, &readings) {
            tracing::warn!(lap_name, error = %err, "dropping streamed telemetry after store failure");
        }
    }

    // A sweep may delete the lap between resolve and append; the append then
    // fails NotFound and the message is dropped like any other failure on
    // this channel.
    fn store_streamed(&self, lap_name: &str, readings: &[Reading]) -> Result<(), TelemetryError> {
        let lap = self.registry.find_or_create(lap_name)?;
        let _ = self.store.append_parameters(lap.lap_id, readings)?;
        Ok(())
    }
}
