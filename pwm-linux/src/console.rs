//! Line-oriented operator console on stdin/stdout.

use pwm_core::{ControlError, DutyCycle};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::controller::Controller;

const HELP: &str = "commands: show | set <pin> <duty 0-100> | refresh | ping | status | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Show,
    Set { label: String, duty: String },
    Refresh,
    Ping,
    Status,
    Help,
    Quit,
}

/// Parse one console line. Empty lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let cmd = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("show" | "pins", []) => Command::Show,
        ("set", [label, duty]) => Command::Set {
            label: label.to_string(),
            duty: duty.to_string(),
        },
        ("set", _) => return Err("usage: set <pin> <duty 0-100>".to_string()),
        ("refresh", []) => Command::Refresh,
        ("ping", []) => Command::Ping,
        ("status", []) => Command::Status,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(format!("unknown command {:?}; {}", line.trim(), HELP)),
    };
    Ok(Some(cmd))
}

/// Run until `quit` or end of input. Connectivity changes are printed as they happen.
pub async fn run(controller: &Controller) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut state = controller.subscribe();
    println!("Device at {}. {}", controller.peer(), HELP);
    println!("[status] {}", *state.borrow_and_update());
    print_pins(controller);
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("[status] {}", *state.borrow_and_update());
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(cmd)) => execute(controller, cmd).await,
                    Ok(None) => {}
                    Err(msg) => println!("{}", msg),
                }
            }
        }
    }
    Ok(())
}

async fn execute(controller: &Controller, cmd: Command) {
    match cmd {
        Command::Show => print_pins(controller),
        Command::Set { label, duty } => set(controller, &label, &duty).await,
        Command::Refresh => match controller.refresh().await {
            Ok(()) => print_pins(controller),
            Err(e) if e.is_recoverable() => {
                println!("refresh failed: {}; pins keep their last known values", e)
            }
            Err(e) => println!("refresh failed: {}", e),
        },
        Command::Ping => {
            if controller.probe_once().await {
                println!("ping acknowledged");
            } else {
                println!("no response from device, check the connection");
            }
        }
        Command::Status => println!("[status] {}", controller.state()),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}

async fn set(controller: &Controller, label: &str, duty: &str) {
    let duty: DutyCycle = match duty.parse() {
        Ok(d) => d,
        Err(e) => {
            println!("update rejected: {}", e);
            return;
        }
    };
    match controller.set_duty_cycle(label, i64::from(duty.get())).await {
        Ok(_) => match controller.reflect(label, duty) {
            Ok(()) => println!("pin {} set to {}%", label, duty),
            Err(_) => println!("pin {} set to {}% (not in the local table)", label, duty),
        },
        Err(e) => println!("{}", update_failure(label, &e)),
    }
}

fn update_failure(label: &str, e: &ControlError) -> String {
    if e.is_recoverable() {
        format!("{}; pin {} keeps its previous value", e, label)
    } else {
        format!("update rejected: {}", e)
    }
}

fn print_pins(controller: &Controller) {
    for (index, c) in controller.pins().iter().enumerate() {
        println!("  [{}] pin {:>3}: {:>3}%", index, c.label, c.duty_cycle);
    }
}
