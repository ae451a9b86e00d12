use std::path::Path;

use clap::Parser;
use color_eyre::Result;
use schellenberg_bridge::{
    cli, config::Config, logging, registry::Registry, serial, session::Session,
};
use tracing::{debug, error, info, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    hangup.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending::<()>().await;
    Ok(())
}

async fn load_settings(registry: &Registry, path: &Path) -> Result<()> {
    if !path.exists() {
        debug!(?path, "No settings file yet");
        return Ok(());
    }

    let contents = std::fs::read_to_string(path)?;
    registry.restore(serde_json::from_str(&contents)?).await;
    info!(?path, "Settings restored");
    Ok(())
}

async fn save_settings(registry: &Registry, path: &Path) -> Result<()> {
    let snapshot = registry.snapshot().await;
    std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)?;
    info!(?path, "Settings saved");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(Level::INFO, None).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)
    } else {
        debug!("Default config");
        Config::default()
    };
    config.validate()?;

    let registry = Registry::new();
    if let Some(path) = &config.settings_file {
        load_settings(&registry, path).await?;
    }

    let port = serial::open(&config.serial.path, config.serial.baud)?;
    let session = Session::start(port, config.timing.clone(), registry.clone()).await?;
    info!(self_id = %session.self_id(), "Bridge running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
        }
        _ = hangup() => {
            info!("Told to hang up, quitting");
        }
        fatal = session.closed() => {
            if let Some(e) = fatal {
                error!(%e, "Session ended");
                if let Some(path) = &config.settings_file {
                    save_settings(&registry, path).await?;
                }
                return Err(e.into());
            }
            info!("Session ended");
        }
    }

    session.shutdown();

    if let Some(path) = &config.settings_file {
        save_settings(&registry, path).await?;
    }

    Ok(())
}
