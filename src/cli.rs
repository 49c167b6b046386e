//! Command-line interface and REPL
//!
//! Interactive teleop console driving a [`DeviceLinkClient`]. One command
//! per line; `help` lists them.

use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;

use petlink::{ActuatorKind, DeviceLinkClient, RawAngleSet, SharedState};

/// Run the interactive console until `quit` or Ctrl+C
pub async fn run_repl(client: &DeviceLinkClient, default_address: Option<String>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "PetLink console — type 'help' for commands".dimmed());

    loop {
        let readline = rl.readline("petlink> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if line == "exit" || line == "quit" {
                    break;
                }
                if let Err(e) = handle_command(client, default_address.as_deref(), line).await {
                    eprintln!("{} {e:#}", "error:".red().bold());
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {e}", "readline error:".red().bold());
                break;
            }
        }
    }

    Ok(())
}

async fn handle_command(
    client: &DeviceLinkClient,
    default_address: Option<&str>,
    line: &str,
) -> Result<()> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    match command {
        "help" => print_help(),

        "connect" => {
            let address = args.first().copied().or(default_address);
            client.connect(address).await?;
        }
        "disconnect" => client.disconnect().await?,
        "toggle" => {
            let address = args.first().copied().or(default_address);
            client.toggle_connection(address).await?;
        }
        "status" => {
            let status = client.status();
            let painted = match status.as_str() {
                "connected" => status.to_string().green(),
                "disconnected" => status.to_string().red(),
                other => other.yellow(),
            };
            println!("link: {}", painted);
            if let Some(address) = client.address() {
                println!("address: {}", address);
            }
            println!("clients: {}", client.clients().join(", "));
        }
        "clients" => {
            for client_id in client.clients() {
                println!("  {}", client_id);
            }
        }

        "angle" => {
            let (kind, index, angle) = parse_angle_args(&args)?;
            client.set_angle(kind, index, angle, false)?;
        }
        "nudge" => {
            let (kind, index, delta) = parse_angle_args(&args)?;
            client.set_angle(kind, index, delta, true)?;
        }
        "angles" => {
            if args.is_empty() {
                println!("{}", serde_json::to_string_pretty(&client.angles())?);
            } else {
                let raw: RawAngleSet = serde_json::from_str(&args.join(" "))
                    .context("expected JSON like {\"servo\": [90, 45]}")?;
                let confirmed = client.set_angles(&raw).await?;
                println!("{} {}", "confirmed:".green(), serde_json::to_string(&confirmed)?);
            }
        }
        "tare" => {
            let kind: ActuatorKind = args
                .first()
                .context("usage: tare <servo|stepper> [index]")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let index = match args.get(1) {
                Some(raw) => raw.parse().context("index must be an integer")?,
                None => 0,
            };
            client.tare_angle(kind, index).await?;
            println!("{}", "tared".green());
        }

        "state" => println!("{}", serde_json::to_string_pretty(&client.shared_state())?),
        "set" => {
            let state: SharedState = serde_json::from_str(&args.join(" "))
                .context("expected a JSON object")?;
            client.set_state(state)?;
        }
        "update" => {
            let diff: SharedState = serde_json::from_str(&args.join(" "))
                .context("expected a JSON object (null values delete keys)")?;
            let confirmed = client.update_state(diff).await?;
            println!(
                "{} {}",
                "confirmed:".green(),
                serde_json::to_string(&confirmed)?
            );
        }
        "client" => {
            let id = args.first().context("usage: client <id> <json>")?;
            let value: Value = serde_json::from_str(&args[1..].join(" "))
                .context("expected a JSON value")?;
            client.update_client_state(id, value).await?;
        }
        "broadcast" => {
            let payload: Value = serde_json::from_str(&args.join(" "))
                .context("expected a JSON value")?;
            client.broadcast(payload)?;
        }

        other => bail!("unknown command {other:?} (try 'help')"),
    }

    Ok(())
}

fn parse_angle_args(args: &[&str]) -> Result<(ActuatorKind, usize, f64)> {
    let kind: ActuatorKind = args
        .first()
        .context("usage: angle <servo|stepper> <index> <degrees>")?
        .parse()
        .map_err(anyhow::Error::msg)?;
    let index = args
        .get(1)
        .context("missing actuator index")?
        .parse()
        .context("index must be an integer")?;
    let angle = args
        .get(2)
        .context("missing angle")?
        .parse()
        .context("angle must be a number")?;
    Ok((kind, index, angle))
}

fn print_help() {
    println!("{}", "Connection".bold());
    println!("  connect [addr]        open the link (addr remembered for reuse)");
    println!("  disconnect            close the link");
    println!("  toggle [addr]         connect/disconnect");
    println!("  status                show link state and roster");
    println!("  clients               list connected clients");
    println!("{}", "Actuators".bold());
    println!("  angle <kind> <i> <deg>   absolute move (kind: servo|stepper)");
    println!("  nudge <kind> <i> <deg>   relative move");
    println!("  angles                   print the angle mirror");
    println!("  angles <json>            set all angles, e.g. {{\"servo\": [90, 45]}}");
    println!("  tare <kind> [i]          re-zero one actuator");
    println!("{}", "Shared state".bold());
    println!("  state                 print the shared-state mirror");
    println!("  set <json>            propose a state replacement");
    println!("  update <json>         propose a patch (null deletes a key)");
    println!("  client <id> <json>    write one client's state entry");
    println!("  broadcast <json>      relay a payload to all peers");
    println!("{}", "Other".bold());
    println!("  help, quit");
}
