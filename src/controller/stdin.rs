// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::io;
use std::path::PathBuf;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::pack::PackId;

const HELP: &str = "Commands: enable, disable, volume <0-1>, select <id>, rescan, packs, status, \
import <path>, export <id> <path>, delete <id>, set <field> <value>, quit";

/// A controller that reads line commands from stdin.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads and forwards one command. Returns false once input is exhausted or the user
    /// quit.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "> ")?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return send(events_tx, Event::Quit).map(|_| false);
        }

        match parse(&input) {
            Ok(Some(event)) => {
                let keep_going = event != Event::Quit;
                send(events_tx, event)?;
                Ok(keep_going)
            }
            Ok(None) => Ok(true),
            Err(message) => {
                warn!(input = input.trim(), "Unrecognized input");
                writeln!(writer, "{}\n{}", message, HELP)?;
                Ok(true)
            }
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

fn send(events_tx: &Sender<Event>, event: Event) -> Result<(), io::Error> {
    events_tx
        .blocking_send(event)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Parses a command line. Blank lines yield no event.
pub fn parse(line: &str) -> Result<Option<Event>, String> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let event = match command.to_lowercase().as_str() {
        "" => return Ok(None),
        "enable" => Event::Enable(true),
        "disable" => Event::Enable(false),
        "volume" => Event::Volume(
            rest.parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format!("Invalid volume {:?}.", rest))?,
        ),
        "select" => Event::Select(PackId::from(required(rest, "select <id>")?)),
        "rescan" => Event::Rescan,
        "packs" => Event::Packs,
        "status" => Event::Status,
        "import" => Event::Import(PathBuf::from(required(rest, "import <path>")?)),
        "export" => {
            let (id, dest) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "Usage: export <id> <path>".to_string())?;
            Event::Export(PackId::from(id), PathBuf::from(dest.trim()))
        }
        "delete" => Event::Delete(PackId::from(required(rest, "delete <id>")?)),
        "set" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .map(|(field, value)| (field, value.trim()))
                .unwrap_or((rest, ""));
            if field.is_empty() {
                return Err("Usage: set <field> <value>".to_string());
            }
            Event::Set {
                field: field.to_string(),
                value: value.to_string(),
            }
        }
        "quit" | "exit" => Event::Quit,
        other => return Err(format!("Unknown command {:?}.", other)),
    };
    Ok(Some(event))
}

fn required<'a>(value: &'a str, usage: &str) -> Result<&'a str, String> {
    if value.is_empty() {
        Err(format!("Usage: {}", usage))
    } else {
        Ok(value)
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "stdin driver");
            let _enter = span.enter();

            info!("Stdin driver started.");
            println!("{}", HELP);

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            info!("Stdin driver stopped.");
            Ok(())
        })
    }
}
