// Nest API resource types
//
// Thermostat and Structure mirror the remote JSON objects. Only the fields
// the setters care about are typed strictly; everything is `Option` with
// `#[serde(default)]` because the service omits fields depending on device
// capabilities and token scopes, and unknown fields land in `extra`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::client::NestClient;
use crate::error::Error;

// ── Modes ────────────────────────────────────────────────────────────

/// Thermostat HVAC mode.
///
/// Numeric codes follow declaration order: `Cool = 0` .. `Off = 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HvacMode {
    Cool,
    Heat,
    HeatCool,
    Off,
}

const HVAC_MODE_HELP: &str = "Invalid HvacMode requested - must be cool, heat, heat-cool or off";

impl TryFrom<i32> for HvacMode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Cool),
            1 => Ok(Self::Heat),
            2 => Ok(Self::HeatCool),
            3 => Ok(Self::Off),
            _ => Err(Error::api(HVAC_MODE_HELP)),
        }
    }
}

impl TryFrom<&str> for HvacMode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        match value {
            "cool" => Ok(Self::Cool),
            "heat" => Ok(Self::Heat),
            "heat-cool" => Ok(Self::HeatCool),
            "off" => Ok(Self::Off),
            _ => Err(Error::api(HVAC_MODE_HELP)),
        }
    }
}

/// Structure occupancy state.
///
/// Numeric codes follow declaration order: `Home = 0`, `Away = 1`, `AutoAway = 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AwayMode {
    Home,
    Away,
    AutoAway,
}

const AWAY_MODE_HELP: &str = "Invalid Away requested - must be home, away or auto-away";

impl TryFrom<i32> for AwayMode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Home),
            1 => Ok(Self::Away),
            2 => Ok(Self::AutoAway),
            _ => Err(Error::api(AWAY_MODE_HELP)),
        }
    }
}

impl TryFrom<&str> for AwayMode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Error> {
        match value {
            "home" => Ok(Self::Home),
            "away" => Ok(Self::Away),
            "auto-away" => Ok(Self::AutoAway),
            _ => Err(Error::api(AWAY_MODE_HELP)),
        }
    }
}

// ── Thermostat ───────────────────────────────────────────────────────

/// A thermostat as returned under `devices.thermostats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thermostat {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_long: Option<String>,
    #[serde(default)]
    pub structure_id: Option<String>,
    #[serde(default)]
    pub where_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub last_connection: Option<String>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub can_cool: Option<bool>,
    #[serde(default)]
    pub can_heat: Option<bool>,
    #[serde(default)]
    pub is_using_emergency_heat: Option<bool>,
    #[serde(default)]
    pub has_fan: Option<bool>,
    #[serde(default)]
    pub fan_timer_active: Option<bool>,
    #[serde(default)]
    pub fan_timer_timeout: Option<String>,
    #[serde(default)]
    pub has_leaf: Option<bool>,
    #[serde(default)]
    pub temperature_scale: Option<String>,
    #[serde(default)]
    pub target_temperature_f: Option<i32>,
    #[serde(default)]
    pub target_temperature_c: Option<f64>,
    #[serde(default)]
    pub target_temperature_high_f: Option<i32>,
    #[serde(default)]
    pub target_temperature_high_c: Option<f64>,
    #[serde(default)]
    pub target_temperature_low_f: Option<i32>,
    #[serde(default)]
    pub target_temperature_low_c: Option<f64>,
    #[serde(default)]
    pub away_temperature_high_f: Option<i32>,
    #[serde(default)]
    pub away_temperature_high_c: Option<f64>,
    #[serde(default)]
    pub away_temperature_low_f: Option<i32>,
    #[serde(default)]
    pub away_temperature_low_c: Option<f64>,
    /// Kept as a raw string: the service adds modes (e.g. `"eco"`) that
    /// cannot be set through [`HvacMode`].
    #[serde(default)]
    pub hvac_mode: Option<String>,
    #[serde(default)]
    pub hvac_state: Option<String>,
    #[serde(default)]
    pub ambient_temperature_f: Option<i32>,
    #[serde(default)]
    pub ambient_temperature_c: Option<f64>,
    #[serde(default)]
    pub humidity: Option<u8>,

    /// Remaining fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    pub(crate) client: Option<NestClient>,
}

// ── Structure ────────────────────────────────────────────────────────

/// A structure ("home") grouping devices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub structure_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `"home"`, `"away"` or `"auto-away"`; raw so unknown states survive.
    #[serde(default)]
    pub away: Option<String>,
    #[serde(default)]
    pub thermostats: Vec<String>,
    #[serde(default)]
    pub smoke_co_alarms: Vec<String>,
    #[serde(default)]
    pub cameras: Vec<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub peak_period_start_time: Option<String>,
    #[serde(default)]
    pub peak_period_end_time: Option<String>,
    #[serde(default)]
    pub rhr_enrollment: Option<bool>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    pub(crate) client: Option<NestClient>,
}

// ── Devices ──────────────────────────────────────────────────────────

/// The `devices` collection. Only thermostats are modelled; other device
/// families are kept raw in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub thermostats: HashMap<String, Thermostat>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── ETA ──────────────────────────────────────────────────────────────

/// Estimated arrival window for a trip, submitted to pre-condition a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eta {
    pub trip_id: String,
    pub estimated_arrival_window_begin: DateTime<Utc>,
    pub estimated_arrival_window_end: DateTime<Utc>,
}

impl Eta {
    /// Build an ETA, validating the window against the current time.
    pub fn new(
        trip_id: impl Into<String>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::new_at(trip_id, begin, end, Utc::now())
    }

    /// Build an ETA, validating the window against `now`.
    ///
    /// `begin` must be strictly after `now` and `end` strictly after `begin`.
    pub fn new_at(
        trip_id: impl Into<String>,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, Error> {
        if begin <= now {
            return Err(Error::eta("The begin time must be greater than the time now"));
        }
        if end <= begin {
            return Err(Error::eta("The end time must be greater than the begin time"));
        }
        Ok(Self {
            trip_id: trip_id.into(),
            estimated_arrival_window_begin: begin,
            estimated_arrival_window_end: end,
        })
    }
}

// ── Stream event ─────────────────────────────────────────────────────

/// Payload of a single `data:` record on the event stream.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct StreamEvent<T> {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data: Option<HashMap<String, T>>,
}

/// Convenience alias for structure stream records.
pub type StructuresEvent = StreamEvent<Structure>;

// ── Client back-reference ────────────────────────────────────────────

/// Resources that carry a back-reference to the [`NestClient`] that produced them.
pub trait ClientBound {
    /// Attach `client`; `key` is the mapping key the resource was decoded under.
    fn bind(&mut self, key: &str, client: &NestClient);

    /// The owning client, if attached.
    fn client(&self) -> Option<&NestClient>;
}

impl ClientBound for Thermostat {
    fn bind(&mut self, key: &str, client: &NestClient) {
        if self.device_id.is_empty() {
            key.clone_into(&mut self.device_id);
        }
        self.client = Some(client.clone());
    }

    fn client(&self) -> Option<&NestClient> {
        self.client.as_ref()
    }
}

impl ClientBound for Structure {
    fn bind(&mut self, key: &str, client: &NestClient) {
        if self.structure_id.is_empty() {
            key.clone_into(&mut self.structure_id);
        }
        self.client = Some(client.clone());
    }

    fn client(&self) -> Option<&NestClient> {
        self.client.as_ref()
    }
}

/// Attach `client` to every entry of a decoded mapping.
pub(crate) fn bind_all<T: ClientBound>(entries: &mut HashMap<String, T>, client: &NestClient) {
    for (key, value) in entries.iter_mut() {
        value.bind(key, client);
    }
}
