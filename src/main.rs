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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keyasmr::config::Config;
use keyasmr::controller::{self, Controller};
use keyasmr::pack::{PackId, PackStore};
use keyasmr::service::Service;
use keyasmr::settings::AppSettings;
use keyasmr::{audio, input};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Keyboard sounds for every key press."
)]
struct Cli {
    /// The path to the service config.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the service. Commands are read from stdin.
    Start {},
    /// Lists and validates the installed sound packs.
    Packs {
        /// The packs directory. Defaults to the configured one.
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the keyboards the key hook would read.
    Keyboards {},
    /// Installs a sound pack bundle.
    Import {
        /// The bundle directory.
        path: PathBuf,
    },
    /// Copies an installed sound pack to a directory.
    Export {
        /// The pack id.
        id: String,
        /// The destination directory, or a path ending in .soundpack.
        dest: PathBuf,
    },
    /// Deletes an installed sound pack.
    Delete {
        /// The pack id.
        id: String,
    },
    /// Prints the persisted settings.
    Settings {},
    /// Changes a persisted setting, e.g. `set masterVolume 0.5`.
    Set {
        /// The setting name.
        field: String,
        /// The new value.
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start {} => {
            let source = input::get_source(config.key_source())?;
            let device = audio::get_device(config.audio())?;
            let service = Arc::new(Service::new(config, source, device)?);
            Controller::new(service, Arc::new(controller::stdin::Driver::new()))?
                .join()
                .await?;
        }
        Commands::Packs { dir } => {
            let store = match dir {
                Some(dir) => PackStore::open(&dir)?,
                None => open_store(&config)?,
            };
            let packs = store.enumerate();
            if packs.is_empty() {
                println!("No packs found in {}.", store.dir().display());
                return Ok(());
            }

            println!("Packs (count: {}):", packs.len());
            for pack in packs.iter() {
                println!("- {} [{}]", pack, pack.id);
                let summary = pack.summary();
                if !summary.missing_samples.is_empty() {
                    println!("  missing samples: {}", summary.missing_samples.join(", "));
                }
                if !pack.id.is_canonical() {
                    println!("  id is not a canonical UUID");
                }
            }

            let skipped = store.count().saturating_sub(packs.len());
            if skipped > 0 {
                println!("\nSkipped {} bundles that could not be loaded.", skipped);
            }
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Keyboards {} => {
            let keyboards = input::list_keyboards()?;

            if keyboards.is_empty() {
                println!("No keyboards found.");
                return Ok(());
            }

            println!("Keyboards:");
            for keyboard in keyboards {
                println!("- {}", keyboard);
            }
        }
        Commands::Import { path } => {
            let dest = open_store(&config)?.import(&path)?;
            println!("Imported to {}.", dest.display());
        }
        Commands::Export { id, dest } => {
            let store = open_store(&config)?;
            let pack = store.find(&PackId::from(id.as_str()))?;
            let target = store.export(&pack, &dest)?;
            println!("Exported to {}.", target.display());
        }
        Commands::Delete { id } => {
            open_store(&config)?.delete(&PackId::from(id.as_str()))?;
            println!("Deleted {}.", id);
        }
        Commands::Settings {} => {
            let settings = AppSettings::load(&config.preferences_file())?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Set { field, value } => {
            let path = config.preferences_file();
            let mut settings = AppSettings::load(&path)?;
            settings.set_field(&field, &value)?;
            settings.save(&path)?;
            println!("{} = {}", field, value);
        }
    }

    Ok(())
}

/// Opens the packs directory the service would use.
fn open_store(config: &Config) -> Result<PackStore, Box<dyn Error>> {
    let settings = AppSettings::load(&config.preferences_file())?;
    let dir = PackStore::resolve_dir(&settings.custom_sound_pack_directory, config.packs_dir());
    Ok(PackStore::open(&dir)?)
}
