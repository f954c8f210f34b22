//! Structure command handlers.

use chrono::{Duration, Utc};
use tabled::Tabled;

use nest_api::{NestClient, Structure};

use crate::cli::{GlobalOpts, StructureArgs, StructureCommand};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct StructureRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Away")]
    away: String,
    #[tabled(rename = "Thermostats")]
    thermostats: usize,
    #[tabled(rename = "Time zone")]
    time_zone: String,
}

impl StructureRow {
    fn new(s: &Structure, color: bool) -> Self {
        Self {
            id: s.structure_id.clone(),
            name: output::opt(s.name.as_deref()),
            away: output::paint_away(s.away.as_deref().unwrap_or_default(), color),
            thermostats: s.thermostats.len(),
            time_zone: output::opt(s.time_zone.as_deref()),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(client: &NestClient, global: &GlobalOpts) -> Result<(), CliError> {
    let structures = super::sorted(client.structures().await?);
    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &structures,
        |s| StructureRow::new(s, color),
        |s| s.structure_id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn handle(
    client: &NestClient,
    args: StructureArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let structure = client.structure(args.id);

    match args.command {
        StructureCommand::Away { mode } => {
            let mode = parse_mode(&mode);
            match mode {
                Ok(code) => structure.set_away(code).await?,
                Err(name) => structure.set_away(name.as_str()).await?,
            }
            if !global.quiet {
                eprintln!("Away state updated");
            }
            Ok(())
        }

        StructureCommand::Eta {
            trip_id,
            arrive_in,
            window,
        } => {
            if window == 0 {
                return Err(CliError::Validation {
                    field: "window".into(),
                    reason: "the arrival window must be at least one minute".into(),
                });
            }
            let begin = Utc::now() + Duration::minutes(i64::from(arrive_in));
            let end = begin + Duration::minutes(i64::from(window));
            structure.set_eta(trip_id, begin, end).await?;
            if !global.quiet {
                eprintln!(
                    "ETA submitted: {} to {}",
                    begin.format("%H:%M"),
                    end.format("%H:%M")
                );
            }
            Ok(())
        }
    }
}

/// Numeric codes go through the integer conversion, anything else as a name.
pub(crate) fn parse_mode(raw: &str) -> Result<i32, String> {
    raw.parse::<i32>().map_err(|_| raw.to_owned())
}
