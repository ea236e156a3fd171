use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

mod actuator;
mod bus_bridge;
mod config;
mod error;
mod local_link;
mod router;
mod state_store;

use actuator::{GpioLine, GpiosetActuator};
use bus_bridge::{BusSettings, PropIdentity};
use config::load_settings;
use local_link::{build_app, LinkServerState};
use router::Router;
use state_store::StateStore;

const EVENT_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(about = "Cryptex prop controller: UI link, MQTT bus and maglock")]
struct Args {
    #[arg(long, default_value = "controller.toml")]
    config: PathBuf,
    /// Overrides the configured broker, e.g. mqtt://192.168.1.99:1883
    #[arg(long)]
    broker: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    if let Some(broker) = args.broker {
        settings.mqtt_broker = broker;
    }
    settings.validate()?;

    info!("cryptex controller starting");
    info!(
        prop_id = %settings.prop_id,
        broker = %settings.mqtt_broker,
        gpio_chip = %settings.gpio_chip,
        gpio_line = settings.gpio_line,
        ws_bind = %settings.ws_bind,
        "configuration"
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (publisher, bridge) = bus_bridge::connect(BusSettings {
        broker: settings.broker()?,
        identity: PropIdentity {
            prop_id: settings.prop_id(),
            name: settings.prop_name.clone(),
        },
        topics: settings.topics(),
        reconnect_interval: settings.reconnect_interval(),
    })?;

    let actuator = GpiosetActuator::new(GpioLine {
        program: settings.gpio_program.clone(),
        chip: settings.gpio_chip.clone(),
        line: settings.gpio_line,
    });
    let mut router = Router::new(StateStore::new(), Box::new(actuator), Arc::new(publisher));
    router.start().await;

    let addr = settings.ws_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind local link on {addr}"))?;
    info!(%addr, "local link listening");
    let app = build_app(LinkServerState::new(
        events_tx.clone(),
        router.subscribe_state(),
        shutdown_rx.clone(),
    ));
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    let bus = tokio::spawn(bridge.run(events_tx, shutdown_rx.clone()));
    let router = tokio::spawn(router.run(events_rx, shutdown_rx));

    wait_for_termination().await?;
    info!("termination requested");
    let _ = shutdown_tx.send(true);

    router.await.context("router task panicked")?;
    bus.await.context("bus task panicked")?;
    if let Err(error) = server.await.context("local link task panicked")? {
        error!(%error, "local link server error");
    }
    info!("cryptex controller stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
