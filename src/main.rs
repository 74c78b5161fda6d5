//! mqtt-coap-bridge entry point.
//!
//! Connects to the MQTT broker, starts the dispatch loop and serves the
//! CoAP resources until Ctrl-C.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mqtt_coap_bridge::api;
use mqtt_coap_bridge::bus::MqttBus;
use mqtt_coap_bridge::cli::{Cli, Invocation};
use mqtt_coap_bridge::coap::{CoapPeer, CoapServer};
use mqtt_coap_bridge::config::{BridgeConfig, LogFormat};
use mqtt_coap_bridge::domain;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::interpret(std::env::args_os()) {
        Invocation::Run(cli) => cli,
        Invocation::Exit(text) => {
            println!("{text}");
            return Ok(());
        }
        Invocation::Invalid(err) => err.exit(),
    };

    // Load configuration
    let config = BridgeConfig::from_cli(&cli).context("invalid configuration")?;

    // Initialize tracing
    init_tracing(config.log_format);
    tracing::info!(
        broker = %config.mqtt.broker,
        coap_addr = %config.coap_addr,
        "starting mqtt-coap-bridge"
    );

    // Build the dispatch loop
    let (dispatcher_handle, dispatcher) = domain::channel::<CoapPeer>(config.dispatch_capacity);
    let dispatcher = dispatcher.with_delivery_timeout(config.delivery_timeout);

    // Connect to MQTT and subscribe to every topic
    let (bus, inbound) = MqttBus::connect(&config.mqtt)
        .await
        .inspect_err(|err| tracing::error!(error = %err, "failed initializing mqtt client"))
        .context("failed initializing mqtt client")?;

    // Bind the CoAP server
    let router = api::build_router(bus, dispatcher_handle.clone())?;
    let server = CoapServer::bind(config.coap_addr, router, config.keepalive)
        .await
        .inspect_err(|err| tracing::error!(error = %err, "failed initializing coap server"))
        .context("failed initializing coap server")?;

    tokio::spawn(dispatcher.run());
    tokio::spawn(inbound.run(dispatcher_handle));

    tokio::select! {
        result = server.serve() => {
            result
                .inspect_err(|err| tracing::error!(error = %err, "failed running coap server"))
                .context("failed running coap server")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed listening for ctrl-c")?;
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
