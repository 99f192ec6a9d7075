//! Tether Agent Binary
//!
//! Headless session agent: checks in with the controller and runs the
//! tasking loop until told to exit.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tether_agent::{handlers, host, AgentConfig, Session};
use tether_proto::Envelope;
use tether_transport::{SocketConnector, TcpConfig, TcpTransport};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting tether agent");

    let path = AgentConfig::locate(std::env::args().nth(1))?;
    let config = AgentConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    if config.encryption.enabled {
        bail!("Encryption is enabled but this build has no cipher backend");
    }

    let transport = Arc::new(TcpTransport::new(TcpConfig {
        proxy: config.proxy.clone(),
        ..TcpConfig::default()
    }));
    let connector = Arc::new(SocketConnector::new(config.sockets()));

    let mut session = Session::new(&config, transport, connector, Envelope::plain())
        .context("Failed to create session")?;
    handlers::register_builtin(session.dispatcher_mut());

    let route = config.endpoints.first().context("No endpoints configured")?;
    let info = host::collect((route.host.as_str(), route.port)).await;

    info!("All handlers registered, starting session");

    if let Err(e) = session.run(&info).await {
        error!("Session error: {}", e);
        std::process::exit(1);
    }

    info!("Agent shutting down");
    Ok(())
}
