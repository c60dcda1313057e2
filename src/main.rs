use std::sync::Arc;

use clap::Parser;
use secrecy::ExposeSecret;

use walink::config::Config;
use walink::identity::InMemoryIdentityStore;
use walink::network::mock::MockNetwork;
use walink::provisioning::{ProvisioningState, start_server};

#[derive(Parser, Debug)]
#[command(name = "walink", version)]
#[command(about = "Provisioning API for linking remote messaging accounts")]
struct Args {
    /// Address to bind to (overrides PROVISIONING_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides PROVISIONING_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the shared secret to stdout when it was generated
    #[arg(long)]
    show_secret: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.provisioning.host = host;
    }
    if let Some(port) = args.port {
        config.provisioning.port = port;
    }

    walink::logging::init(&config.logging)?;
    tracing::info!("Starting walink v{}", env!("CARGO_PKG_VERSION"));

    if config.provisioning.secret_generated {
        tracing::warn!("PROVISIONING_SHARED_SECRET is not set, generated a secret for this run");
        if args.show_secret {
            println!("{}", config.provisioning.shared_secret.expose_secret());
        }
    }

    let store = Arc::new(InMemoryIdentityStore::new());
    let network = MockNetwork::development(
        store.clone(),
        config.mock.qr_rotations,
        config.mock.step_interval,
    );
    tracing::warn!(
        qr_rotations = config.mock.qr_rotations,
        "Using the scripted development network, no remote traffic will happen"
    );

    let state = Arc::new(ProvisioningState::new(store, Arc::new(network)));
    let addr = start_server(
        config.provisioning.socket_addr()?,
        Arc::clone(&state),
        config.provisioning.shared_secret.clone(),
    )
    .await?;
    tracing::info!("Provisioning API listening on http://{}", addr);

    tokio::signal::ctrl_c().await?;
    state.shutdown().await;
    Ok(())
}
