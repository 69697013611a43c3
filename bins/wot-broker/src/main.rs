use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wot_core::{EnvSnapshot, Options};
use wot_server::{coap_server, websocket_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wot_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let transport = std::env::args().nth(1).unwrap_or_else(|| "websocket".into());
    let mut framework = match transport.as_str() {
        "coap" => coap_server(),
        "websocket" => websocket_server(),
        other => anyhow::bail!("Unknown transport {other:?}, expected \"coap\" or \"websocket\""),
    };

    tracing::info!("WoT broker starting ({})...", transport);

    // Read the environment once, here
    framework
        .server_mut()
        .set_source(std::sync::Arc::new(EnvSnapshot::capture()));

    framework.start_with(
        Options::new()
            .on_start(|info| {
                tracing::info!(
                    "Serving {} on {} (endpoints: {:?})",
                    info.transport,
                    info.local_addr,
                    info.endpoints
                );
            })
            .on_new_thing(|thing| {
                tracing::info!("New thing {} over {}", thing.id, thing.transport);
            })
            .on_data(|payload| {
                tracing::debug!("Data from {}: {}", payload.thing_id, payload.data);
            }),
    )?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");

    let status = framework.stop().await;
    tracing::info!(
        "Broker stopped (was running: {}, things seen: {})",
        status.was_running,
        framework.things().len()
    );

    Ok(())
}
