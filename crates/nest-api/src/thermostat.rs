// Thermostat endpoints
//
// Field setters PUT a minimal JSON patch to
// `/devices/thermostats/{device_id}`; every setter validates its input
// first and sends nothing when validation fails.

use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use crate::client::{DEVICES_COLLECTION, NestClient};
use crate::error::Error;
use crate::models::{Devices, HvacMode, Thermostat, bind_all};

const CELSIUS_RANGE: std::ops::RangeInclusive<f64> = 9.0..=32.0;
const FAHRENHEIT_RANGE: std::ops::RangeInclusive<i32> = 50..=90;

impl NestClient {
    /// Fetch the devices collection.
    ///
    /// `GET /devices.json`
    pub async fn devices(&self) -> Result<Devices, Error> {
        debug!("fetching devices");
        let mut devices: Devices = self.fetch(DEVICES_COLLECTION).await?;
        bind_all(&mut devices.thermostats, self);
        Ok(devices)
    }

    /// Fetch all thermostats, keyed by device ID.
    pub async fn thermostats(&self) -> Result<HashMap<String, Thermostat>, Error> {
        Ok(self.devices().await?.thermostats)
    }
}

impl Thermostat {
    /// Turn the fan timer on or off.
    ///
    /// `{"fan_timer_active": <bool>}`
    pub async fn set_fan_timer_active(&self, active: bool) -> Result<(), Error> {
        self.update(&json!({ "fan_timer_active": active })).await
    }

    /// Set the HVAC mode.
    ///
    /// Accepts an [`HvacMode`], a numeric mode code or a mode string;
    /// anything unrecognised fails with `api_error` before a request is made.
    ///
    /// ```rust,ignore
    /// thermostat.set_hvac_mode(HvacMode::HeatCool).await?;
    /// thermostat.set_hvac_mode("off").await?;
    /// ```
    pub async fn set_hvac_mode<M>(&self, mode: M) -> Result<(), Error>
    where
        M: TryInto<HvacMode>,
        Error: From<M::Error>,
    {
        let mode: HvacMode = mode.try_into()?;
        self.update(&json!({ "hvac_mode": mode.as_ref() })).await
    }

    /// Set the target temperature in Celsius (9 to 32 inclusive).
    pub async fn set_target_temp_c(&self, temp: f64) -> Result<(), Error> {
        if !CELSIUS_RANGE.contains(&temp) {
            return Err(Error::api("Temperature must be between 9 and 32 Celsius"));
        }
        self.update(&json!({ "target_temperature_c": temp })).await
    }

    /// Set the target temperature in Fahrenheit (50 to 90 inclusive).
    pub async fn set_target_temp_f(&self, temp: i32) -> Result<(), Error> {
        if !FAHRENHEIT_RANGE.contains(&temp) {
            return Err(Error::api("Temperature must be between 50 and 90 Fahrenheit"));
        }
        self.update(&json!({ "target_temperature_f": temp })).await
    }

    /// Set the heat-cool band in Celsius. `high` must not be below `low`.
    pub async fn set_target_temp_high_low_c(&self, high: f64, low: f64) -> Result<(), Error> {
        if high.is_nan() || low.is_nan() || high < low {
            return Err(Error::api(
                "The high temperature must be greater than the low temperature",
            ));
        }
        self.update(&json!({
            "target_temperature_high_c": high,
            "target_temperature_low_c": low,
        }))
        .await
    }

    /// Set the heat-cool band in Fahrenheit. `high` must not be below `low`.
    pub async fn set_target_temp_high_low_f(&self, high: i32, low: i32) -> Result<(), Error> {
        if high < low {
            return Err(Error::api(
                "The high temperature must be greater than the low temperature",
            ));
        }
        self.update(&json!({
            "target_temperature_high_f": high,
            "target_temperature_low_f": low,
        }))
        .await
    }

    /// `PUT /devices/thermostats/{device_id}`
    async fn update(&self, body: &serde_json::Value) -> Result<(), Error> {
        let client = self.client.as_ref().ok_or_else(|| {
            Error::api(format!(
                "thermostat '{}' is not associated with a client",
                self.device_id
            ))
        })?;
        debug!(device_id = %self.device_id, %body, "updating thermostat");
        client
            .put::<Thermostat>(&["devices", "thermostats", self.device_id.as_str()], body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Detached thermostats make any attempted request fail with a distinct
    // message, so these tests prove validation short-circuits first.
    fn detached() -> Thermostat {
        Thermostat {
            device_id: "t1".into(),
            ..Thermostat::default()
        }
    }

    fn validation_message(result: Result<(), Error>) -> String {
        let err = result.expect_err("expected validation failure");
        assert_eq!(err.kind().as_str(), "api_error");
        err.description().to_owned()
    }

    #[tokio::test]
    async fn celsius_bounds() {
        let t = detached();
        for temp in [8.9, 32.1, f64::NAN, -40.0] {
            let msg = validation_message(t.set_target_temp_c(temp).await);
            assert!(msg.contains("between 9 and 32"), "{temp}: {msg}");
        }
        for temp in [9.0, 21.5, 32.0] {
            let msg = validation_message(t.set_target_temp_c(temp).await);
            assert!(msg.contains("not associated"), "{temp}: {msg}");
        }
    }

    #[tokio::test]
    async fn fahrenheit_bounds() {
        let t = detached();
        for temp in [49, 91, i32::MIN] {
            let msg = validation_message(t.set_target_temp_f(temp).await);
            assert!(msg.contains("between 50 and 90"), "{temp}: {msg}");
        }
        let msg = validation_message(t.set_target_temp_f(50).await);
        assert!(msg.contains("not associated"));
    }

    #[tokio::test]
    async fn high_low_ordering() {
        let t = detached();
        let msg = validation_message(t.set_target_temp_high_low_c(20.0, 22.0).await);
        assert!(msg.contains("high temperature"));
        let msg = validation_message(t.set_target_temp_high_low_f(70, 71).await);
        assert!(msg.contains("high temperature"));

        let msg = validation_message(t.set_target_temp_high_low_f(70, 70).await);
        assert!(msg.contains("not associated"));
    }

    #[tokio::test]
    async fn hvac_mode_rejects_unknown_codes() {
        let t = detached();
        let msg = validation_message(t.set_hvac_mode(99).await);
        assert!(msg.contains("cool, heat, heat-cool or off"));
        let msg = validation_message(t.set_hvac_mode("eco").await);
        assert!(msg.contains("cool, heat, heat-cool or off"));
        let msg = validation_message(t.set_hvac_mode(HvacMode::Cool).await);
        assert!(msg.contains("not associated"));
    }
}
