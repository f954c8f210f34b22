// Structure endpoints
//
// The structures collection (`/structures.json`), away-mode updates and
// ETA submission for a single structure.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::client::{NestClient, STRUCTURES_COLLECTION};
use crate::error::Error;
use crate::models::{AwayMode, Eta, Structure, bind_all};

impl NestClient {
    /// Fetch all structures, keyed by structure ID.
    ///
    /// `GET /structures.json`. The first call also caches the host that
    /// served the response as the redirect base URL.
    pub async fn structures(&self) -> Result<HashMap<String, Structure>, Error> {
        debug!("fetching structures");
        let mut structures: HashMap<String, Structure> =
            self.fetch(STRUCTURES_COLLECTION).await?;
        bind_all(&mut structures, self);
        Ok(structures)
    }
}

impl Structure {
    /// Set the away state.
    ///
    /// Accepts an [`AwayMode`], a numeric code or a mode string.
    pub async fn set_away<M>(&self, mode: M) -> Result<(), Error>
    where
        M: TryInto<AwayMode>,
        Error: From<M::Error>,
    {
        let mode: AwayMode = mode.try_into()?;
        let client = self.bound_client()?;
        debug!(structure_id = %self.structure_id, away = %mode, "updating structure");
        client
            .put::<Structure>(
                &["structures", self.structure_id.as_str()],
                &json!({ "away": mode.as_ref() }),
            )
            .await
    }

    /// Submit an arrival window for a trip.
    ///
    /// `begin` must lie in the future and `end` after `begin`; otherwise an
    /// `eta_error` is returned without contacting the API.
    pub async fn set_eta(
        &self,
        trip_id: impl Into<String>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), Error> {
        let eta = Eta::new(trip_id, begin, end)?;
        self.submit_eta(&eta).await
    }

    /// `PUT /structures/{structure_id}/eta.json` with a pre-validated [`Eta`].
    pub async fn submit_eta(&self, eta: &Eta) -> Result<(), Error> {
        let client = self.bound_client()?;
        debug!(structure_id = %self.structure_id, trip_id = %eta.trip_id, "submitting ETA");
        client
            .put::<serde_json::Value>(&["structures", self.structure_id.as_str(), "eta.json"], eta)
            .await
    }

    fn bound_client(&self) -> Result<&NestClient, Error> {
        self.client.as_ref().ok_or_else(|| {
            Error::api(format!(
                "structure '{}' is not associated with a client",
                self.structure_id
            ))
        })
    }
}
