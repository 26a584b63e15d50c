/**
 * XFBackplane Demo Entry Point
 *
 * Runs two backplane nodes on one in-process bus and walks through the
 * cross-server paths: a remote group join with its ack, a group broadcast,
 * and a client result routed back to the invoking node.
 */

#[cfg(feature = "demo")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::Arc;

    use serde_json::json;
    use xfbackplane::backend::protocol::{HubProtocol, JsonHubProtocol, ProtocolRegistry};
    use xfbackplane::backend::realtime::MemoryPubSub;
    use xfbackplane::backend::server::{load_config, BackplaneNode, LocalConnection};
    use xfbackplane::shared::{BackplaneConfig, CompletionMessage, HubMessage, InvocationMessage};

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!("[STARTUP] Backplane demo starting");

    let base = load_config()?;
    let config_for = |name: &str| -> Result<BackplaneConfig, Box<dyn std::error::Error>> {
        Ok(BackplaneConfig::builder()
            .channel_prefix(base.channel_prefix.clone())
            .server_name(format!("{}-{}", base.server_name, name))
            .ack_timeout(base.ack_timeout)
            .ack_sweep_interval(base.ack_sweep_interval)
            .client_result_timeout(base.client_result_timeout)
            .protocols(base.protocols.clone())
            .build()?)
    };

    let bus = Arc::new(MemoryPubSub::new());
    let registry = ProtocolRegistry::new().with(Arc::new(JsonHubProtocol));
    let node_a = BackplaneNode::start(config_for("a")?, bus.clone(), registry.clone()).await?;
    let node_b = BackplaneNode::start(config_for("b")?, bus.clone(), registry).await?;

    let (alice, mut alice_rx) = LocalConnection::new("alice-conn", "json");
    node_b.on_connected(alice.with_user("alice")).await?;

    // Node A does not own alice-conn, so this goes through a group command and ack
    node_a.add_to_group("alice-conn", "lobby").await?;
    tracing::info!("[Demo] Remote group join acknowledged");

    node_a
        .send_group("lobby", InvocationMessage::new("announce", vec![json!("hello lobby")]))
        .await?;
    if let Some(payload) = alice_rx.recv().await {
        tracing::info!("[Demo] alice received {}", String::from_utf8_lossy(&payload));
    }

    // Answer the client-result request the way a connected client would
    let responder = node_b.clone();
    let answer = tokio::spawn(async move {
        let payload = alice_rx.recv().await?;
        let body = payload.strip_suffix(&[0x1e]).unwrap_or(&payload[..]);
        let request: serde_json::Value = serde_json::from_slice(body).ok()?;
        let invocation_id = request["invocationId"].as_str()?.to_string();

        let completion = CompletionMessage::with_result(invocation_id.clone(), json!(42));
        let bytes = JsonHubProtocol
            .write_message(&HubMessage::Completion(completion))
            .ok()?;
        responder
            .complete_client_result(&invocation_id, "json", bytes)
            .await
            .ok()
    });

    let completion = node_a
        .invoke_connection("alice-conn", InvocationMessage::new("pickNumber", vec![]))
        .await?;
    tracing::info!("[Demo] Client result: {:?}", completion.result);
    answer.await?;

    node_b.on_disconnected("alice-conn").await?;
    node_a.shutdown().await;
    node_b.shutdown().await;
    tracing::info!("[Demo] Done, {} channels still active", bus.active_channels().len());

    Ok(())
}

#[cfg(not(feature = "demo"))]
fn main() {
    eprintln!("The demo requires the 'demo' feature to be enabled.");
    eprintln!("Run with: cargo run --bin backplane-demo --features demo");
    std::process::exit(1);
}
