//! `nest watch`: print live changes from the event stream until Ctrl-C.

use std::collections::{BTreeMap, HashMap};

use chrono::Local;
use tokio::sync::mpsc;

use nest_api::{NestClient, ReconnectConfig, Structure, Thermostat};

use crate::cli::{GlobalOpts, WatchArgs, WatchTarget};
use crate::error::CliError;
use crate::output;

enum Update {
    Structures(HashMap<String, Structure>),
    Thermostats(HashMap<String, Thermostat>),
}

pub async fn handle(
    client: &NestClient,
    args: WatchArgs,
    mut reconnect: ReconnectConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.max_retries.is_some() {
        reconnect.max_retries = args.max_retries;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = match args.target {
        WatchTarget::Structures => client.structures_stream(reconnect, move |event| {
            let _ = tx.send(event.map(Update::Structures));
        }),
        WatchTarget::Thermostats => client.thermostats_stream(reconnect, move |event| {
            let _ = tx.send(event.map(Update::Thermostats));
        }),
    };

    if !global.quiet {
        eprintln!("Watching {:?} (Ctrl-C to stop)", args.target);
    }

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    let mut last_error = None;
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("interrupted, closing stream");
                interrupted = true;
                break;
            }
            event = rx.recv() => match event {
                Some(Ok(update)) => {
                    last_error = None;
                    let out = render(&update, global)?;
                    output::print_output(&out, global.quiet);
                }
                Some(Err(err)) => {
                    if !global.quiet {
                        eprintln!("stream connect failed: {err}");
                    }
                    last_error = Some(err);
                }
                // The stream task dropped its callback: out of retries.
                None => break,
            }
        }
    }

    handle.shutdown();
    handle.join().await;

    match last_error {
        Some(err) if !interrupted => Err(err.into()),
        _ => Ok(()),
    }
}

fn render(update: &Update, global: &GlobalOpts) -> Result<String, CliError> {
    let color = output::should_color(&global.color);
    let stamp = Local::now().format("%H:%M:%S").to_string();

    match update {
        Update::Structures(map) => {
            let sorted: BTreeMap<&String, &Structure> = map.iter().collect();
            output::render_single(
                &global.output,
                &sorted,
                |m| {
                    m.iter()
                        .map(|(id, s)| {
                            format!(
                                "{stamp} structure {id} {} away={}",
                                s.name.as_deref().unwrap_or("-"),
                                output::paint_away(s.away.as_deref().unwrap_or("?"), color),
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                },
                |m| m.keys().map(|k| k.as_str()).collect::<Vec<_>>().join("\n"),
            )
        }
        Update::Thermostats(map) => {
            let sorted: BTreeMap<&String, &Thermostat> = map.iter().collect();
            output::render_single(
                &global.output,
                &sorted,
                |m| {
                    m.iter()
                        .map(|(id, t)| {
                            format!(
                                "{stamp} thermostat {id} {} mode={} ambient={} target={}",
                                t.name.as_deref().unwrap_or("-"),
                                output::paint_hvac(t.hvac_mode.as_deref().unwrap_or("?"), color),
                                output::opt(t.ambient_temperature_c),
                                output::opt(t.target_temperature_c),
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                },
                |m| m.keys().map(|k| k.as_str()).collect::<Vec<_>>().join("\n"),
            )
        }
    }
}
