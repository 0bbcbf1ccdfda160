use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use statelink_core::config::DEFAULT_CONFIG_FILE;
use statelink_core::{CoreConfig, OffsetTableId, RelayRole};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "statelink")]
#[command(version, about = "Mirror host entity state across peers")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay and control channel against the real host process
    Serve {
        #[command(flatten)]
        node: NodeArgs,

        /// Attach at startup instead of waiting for an Init request
        #[arg(long)]
        attach: bool,
    },
    /// Run the relay and control channel against a simulated host
    Simulate {
        #[command(flatten)]
        node: NodeArgs,
    },
    /// Show the offset table for a host build
    Offsets {
        #[arg(long, default_value = "retail10")]
        version: OffsetTableId,

        /// Write the table as JSON instead of printing it
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Send one request to a running control channel
    Control {
        /// Control port (defaults to the configured one)
        #[arg(long)]
        port: Option<u16>,

        #[command(subcommand)]
        action: commands::control::Action,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args, Default)]
struct NodeArgs {
    #[arg(long)]
    role: Option<RelayRole>,

    /// Relay UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Port hubs announce on and discovering peers listen on
    #[arg(long)]
    discovery_port: Option<u16>,

    #[arg(long)]
    control_port: Option<u16>,

    /// Hub to join directly (peer role), skipping discovery
    #[arg(long)]
    hub: Option<SocketAddr>,

    /// Player id stamped on outgoing packets
    #[arg(long)]
    player_id: Option<u32>,
}

impl NodeArgs {
    fn apply(&self, config: &mut CoreConfig) {
        if let Some(role) = self.role {
            config.relay.role = role;
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(port) = self.discovery_port {
            config.relay.discovery_port = port;
        }
        if let Some(port) = self.control_port {
            config.control.port = port;
        }
        if let Some(hub) = self.hub {
            config.relay.hub_address = Some(hub);
            config.relay.role = RelayRole::Peer;
        }
        if let Some(id) = self.player_id {
            config.local_player_id = Some(id);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "statelink=debug" } else { "statelink=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let mut config = CoreConfig::load(&cli.config)?;

    match cli.command {
        Some(Command::Serve { node, attach }) => {
            node.apply(&mut config);
            commands::serve::run(config, attach)
        }
        None => {
            info!("No command given, serving with configuration defaults");
            commands::serve::run(config, false)
        }
        Some(Command::Simulate { node }) => {
            node.apply(&mut config);
            commands::simulate::run(config)
        }
        Some(Command::Offsets { version, dump }) => commands::offsets::run(version, dump.as_deref()),
        Some(Command::Control { port, action }) => {
            commands::control::run(port.unwrap_or(config.control.port), action)
        }
    }
}
