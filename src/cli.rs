use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{config::Config, device::SenderDevice, registry::Snapshot};

/// The command line interface for the Schellenberg bridge.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example of the settings snapshot persisted between sessions.
    Settings,
}

/// Print whatever the command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => {
                println!("{}", Config::example().serialize_pretty());
            }
            Examples::Settings => {
                let self_id = "ABCDEF".parse().expect("Example id is valid hex");
                let mut sender = SenderDevice::new(self_id);
                sender.name = Some("self".into());

                let snapshot = Snapshot {
                    senders: vec![sender],
                    self_sender_id: Some(self_id),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshot)
                        .expect("Example snapshot serializes")
                );
            }
        },
    }
}
