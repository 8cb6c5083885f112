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
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bardbox::audio;
use bardbox::config::Board;
use bardbox::mapping::PlaybackOptions;
use bardbox::soundboard::{AssetSource, Soundboard};
use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=bardbox soundboard

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/bardbox
ExecStart=/usr/local/bin/bardbox start "$BARDBOX_CONFIG"

[Install]
WantedBy=multi-user.target
Alias=bardbox.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A local soundboard."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the soundboard and serves it over HTTP.
    Start {
        /// The path to the board config.
        config_path: PathBuf,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the bindings of a board.
    Bindings {
        /// The path to the board config.
        config_path: PathBuf,
    },
    /// Binds a trigger to an audio file.
    Bind {
        /// The path to the board config.
        config_path: PathBuf,
        /// The trigger to bind.
        trigger: String,
        /// The audio file, relative to the asset directory or absolute.
        asset: String,
        /// Replace an existing binding.
        #[arg(long)]
        overwrite: bool,
        /// Repeat the sound until it is stopped.
        #[arg(long)]
        looped: bool,
    },
    /// Removes a binding.
    Unbind {
        /// The path to the board config.
        config_path: PathBuf,
        /// The trigger to unbind.
        trigger: String,
    },
    /// Plays a trigger and waits for it to finish.
    Play {
        /// The path to the board config.
        config_path: PathBuf,
        /// The trigger to play.
        trigger: String,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

/// Opens a board for editing bindings only. The audio device is left alone.
fn open_offline(config_path: &Path) -> Result<Soundboard, Box<dyn Error>> {
    let board = Board::deserialize(config_path)?;
    Soundboard::offline(&board)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path } => {
            let board = Board::deserialize(&config_path)?;
            let soundboard = Arc::new(Soundboard::open(&board)?);
            let warmed = soundboard.warm();
            tracing::info!(warmed, "Bound assets decoded");

            #[cfg(feature = "server")]
            bardbox::server::serve(soundboard, board.listen()?).await?;

            #[cfg(not(feature = "server"))]
            {
                tokio::signal::ctrl_c().await?;
                soundboard.stop_all();
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
        Commands::Bindings { config_path } => {
            let soundboard = open_offline(&config_path)?;
            let bindings = soundboard.list();

            if bindings.is_empty() {
                println!("No bindings.");
                return Ok(());
            }

            println!("Bindings (count: {}):", bindings.len());
            for binding in bindings {
                println!("- {} => {}", binding.trigger(), binding.asset());
            }
        }
        Commands::Bind {
            config_path,
            trigger,
            asset,
            overwrite,
            looped,
        } => {
            let soundboard = open_offline(&config_path)?;
            let binding = soundboard.bind(
                &trigger,
                AssetSource::Existing {
                    name: None,
                    file: asset,
                },
                PlaybackOptions {
                    looped,
                    ..Default::default()
                },
                overwrite,
            )?;
            println!("Bound {} => {}", binding.trigger(), binding.asset());
        }
        Commands::Unbind {
            config_path,
            trigger,
        } => {
            let soundboard = open_offline(&config_path)?;
            let removed = soundboard.unbind(&trigger)?;
            println!("Unbound {} ({})", removed.trigger(), removed.asset());
        }
        Commands::Play {
            config_path,
            trigger,
        } => {
            let board = Board::deserialize(&config_path)?;
            let soundboard = Soundboard::open(&board)?;
            let instance = soundboard.play(&trigger)?;
            let waiter = tokio::task::spawn_blocking(move || instance.wait());
            tokio::select! {
                state = waiter => println!("{}: {:?}", trigger, state?),
                _ = tokio::signal::ctrl_c() => {
                    soundboard.stop_all();
                }
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
