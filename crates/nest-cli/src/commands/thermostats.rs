//! Thermostat command handlers.

use tabled::Tabled;

use nest_api::{NestClient, Thermostat};

use crate::cli::{GlobalOpts, TempUnit, ThermostatArgs, ThermostatCommand, Toggle};
use crate::error::CliError;
use crate::output;

use super::structures::parse_mode;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ThermostatRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Ambient")]
    ambient: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Humidity")]
    humidity: String,
    #[tabled(rename = "Online")]
    online: String,
}

impl ThermostatRow {
    fn new(t: &Thermostat, color: bool) -> Self {
        let fahrenheit = t.temperature_scale.as_deref() == Some("F");
        let (ambient, target) = if fahrenheit {
            (
                output::opt(t.ambient_temperature_f.map(|v| format!("{v}°F"))),
                band(
                    t.target_temperature_f.map(|v| format!("{v}°F")),
                    t.target_temperature_low_f,
                    t.target_temperature_high_f,
                    "°F",
                ),
            )
        } else {
            (
                output::opt(t.ambient_temperature_c.map(|v| format!("{v:.1}°C"))),
                band(
                    t.target_temperature_c.map(|v| format!("{v:.1}°C")),
                    t.target_temperature_low_c,
                    t.target_temperature_high_c,
                    "°C",
                ),
            )
        };

        Self {
            id: t.device_id.clone(),
            name: output::opt(t.name.as_deref()),
            mode: output::paint_hvac(t.hvac_mode.as_deref().unwrap_or_default(), color),
            ambient,
            target,
            humidity: output::opt(t.humidity.map(|h| format!("{h}%"))),
            online: match t.is_online {
                Some(true) => "yes".into(),
                Some(false) => "no".into(),
                None => String::new(),
            },
        }
    }
}

/// Show the heat-cool band when both ends are known, else the single target.
fn band<T: std::fmt::Display>(
    single: Option<String>,
    low: Option<T>,
    high: Option<T>,
    unit: &str,
) -> String {
    match (low, high) {
        (Some(low), Some(high)) => format!("{low}-{high}{unit}"),
        _ => single.unwrap_or_default(),
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(client: &NestClient, global: &GlobalOpts) -> Result<(), CliError> {
    let thermostats = super::sorted(client.thermostats().await?);
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &thermostats,
        |t| ThermostatRow::new(t, color),
        |t| t.device_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(
    client: &NestClient,
    args: ThermostatArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let thermostat = client.thermostat(args.id);

    match args.command {
        ThermostatCommand::Fan { state } => {
            thermostat
                .set_fan_timer_active(matches!(state, Toggle::On))
                .await?;
        }

        ThermostatCommand::Mode { mode } => match parse_mode(&mode) {
            Ok(code) => thermostat.set_hvac_mode(code).await?,
            Err(name) => thermostat.set_hvac_mode(name.as_str()).await?,
        },

        ThermostatCommand::Temp { value, unit } => match unit {
            TempUnit::C => thermostat.set_target_temp_c(celsius(&value)?).await?,
            TempUnit::F => thermostat.set_target_temp_f(fahrenheit(&value)?).await?,
        },

        ThermostatCommand::Range { high, low, unit } => match unit {
            TempUnit::C => {
                thermostat
                    .set_target_temp_high_low_c(celsius(&high)?, celsius(&low)?)
                    .await?;
            }
            TempUnit::F => {
                thermostat
                    .set_target_temp_high_low_f(fahrenheit(&high)?, fahrenheit(&low)?)
                    .await?;
            }
        },
    }

    if !global.quiet {
        eprintln!("Thermostat updated");
    }
    Ok(())
}

fn celsius(raw: &str) -> Result<f64, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "temperature".into(),
        reason: format!("'{raw}' is not a number"),
    })
}

fn fahrenheit(raw: &str) -> Result<i32, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "temperature".into(),
        reason: format!("'{raw}' is not a whole number of degrees Fahrenheit"),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn fahrenheit_requires_whole_degrees() {
        assert!(matches!(fahrenheit("72"), Ok(72)));
        assert!(fahrenheit("72.5").is_err());
        assert!(celsius("21.5").is_ok_and(|c| (c - 21.5).abs() < f64::EPSILON));
    }

    #[test]
    fn row_prefers_band_in_heat_cool() {
        let t: Thermostat = serde_json::from_value(serde_json::json!({
            "device_id": "t1",
            "temperature_scale": "C",
            "hvac_mode": "heat-cool",
            "target_temperature_c": 21.0,
            "target_temperature_low_c": 19.5,
            "target_temperature_high_c": 24.0,
            "humidity": 40,
        }))
        .unwrap();
        let row = ThermostatRow::new(&t, false);
        assert_eq!(row.target, "19.5-24°C");
        assert_eq!(row.mode, "heat-cool");
        assert_eq!(row.humidity, "40%");
    }
}
