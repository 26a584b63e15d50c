//! Client result integration tests

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;
use xfbackplane::backend::error::BackplaneError;
use xfbackplane::backend::protocol::{HubProtocol, JsonHubProtocol};
use xfbackplane::backend::realtime::MemoryPubSub;
use xfbackplane::backend::server::{BackplaneNode, ConnectionReceiver, LocalConnection};
use xfbackplane::shared::{CompletionMessage, HubMessage, InvocationMessage};

use crate::common::*;
use crate::{assert_err, assert_ok};

/// Play the client: read the invocation and answer it through `owner`
async fn answer_next(owner: BackplaneNode, mut rx: ConnectionReceiver, result: serde_json::Value) {
    let request = json_body(&recv(&mut rx).await);
    let invocation_id = request["invocationId"]
        .as_str()
        .expect("invocation id")
        .to_string();

    let completion = CompletionMessage::with_result(invocation_id.clone(), result);
    let bytes = JsonHubProtocol
        .write_message(&HubMessage::Completion(completion))
        .unwrap();
    owner
        .complete_client_result(&invocation_id, "json", bytes)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invoke_remote_connection_returns_completion() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    let client = tokio::spawn(answer_next(node_b.clone(), rx, json!({"answer": 42})));
    let completion = assert_ok!(
        node_a
            .invoke_connection("c1", InvocationMessage::new("ask", vec![]))
            .await
    );
    client.await.unwrap();

    assert_eq!(completion.result, Some(json!({"answer": 42})));
    assert_eq!(completion.error, None);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_invoke_local_connection_round_trips_through_the_bus() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let (connection, rx) = LocalConnection::new("c1", "json");
    assert_ok!(node.on_connected(connection).await);

    let client = tokio::spawn(answer_next(node.clone(), rx, json!("local")));
    let completion = assert_ok!(node.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await);
    client.await.unwrap();
    assert_eq!(completion.result, Some(json!("local")));

    node.shutdown().await;
}

#[tokio::test]
async fn test_invocation_carries_id_and_return_channel() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);
    let mut envelopes = tap(&bus, "test:connection:c1").await;

    let client = tokio::spawn(answer_next(node_b.clone(), rx, json!(null)));
    assert_ok!(node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await);
    client.await.unwrap();

    let envelope = xfbackplane::backend::protocol::decode_invocation(envelopes.recv().await.unwrap()).unwrap();
    assert!(envelope.invocation_id.is_some());
    assert_eq!(envelope.return_channel.as_deref(), Some("test:internal:return:server-a"));

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_invoke_unknown_connection_fails_fast() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let started = tokio::time::Instant::now();
    let result = node.invoke_connection("nobody", InvocationMessage::new("ask", vec![])).await;
    assert_err!(result, BackplaneError::ConnectionNotFound { .. });
    assert!(started.elapsed() < node.config().client_result_timeout);

    node.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_invocation_times_out() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, _rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    let result = node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await;
    assert_err!(result, BackplaneError::ClientResultTimeout { .. });

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_completion_in_unsupported_protocol_is_dropped() {
    let bus = Arc::new(MemoryPubSub::new());
    // The origin cannot read "messagepack" completions
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json", "messagepack"]).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    let owner = node_b.clone();
    let client = tokio::spawn(async move {
        let request = json_body(&recv(&mut rx).await);
        let invocation_id = request["invocationId"].as_str().unwrap().to_string();
        let bytes = Bytes::from(format!("messagepack|{}", invocation_id));
        owner
            .complete_client_result(&invocation_id, "messagepack", bytes)
            .await
            .unwrap();
    });

    let result = node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await;
    client.await.unwrap();
    assert_err!(result, BackplaneError::ClientResultTimeout { .. });

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_completing_unknown_invocation_is_an_error() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let result = node
        .complete_client_result("never-sent", "json", Bytes::from_static(b"{}"))
        .await;
    assert_err!(result, BackplaneError::UnknownInvocation { .. });

    node.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_pending_invocation() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    let origin = node_a.clone();
    let pending = tokio::spawn(async move {
        origin
            .invoke_connection("c1", InvocationMessage::new("ask", vec![]))
            .await
    });

    // Once the client sees the request, the wait is registered
    recv(&mut rx).await;
    node_a.shutdown().await;

    assert_err!(pending.await.unwrap(), BackplaneError::Shutdown);
    node_b.shutdown().await;
}

/// Owner whose routes outlive the origin's wait, so only delivery and
/// disconnect can remove them
async fn patient_owner(bus: &Arc<MemoryPubSub>) -> BackplaneNode {
    let mut config = config("server-b", &["json"]);
    config.client_result_timeout = Duration::from_secs(30);
    start_node_with(bus, config, &["json"]).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_route_is_recorded_before_the_client_sees_the_invocation() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = patient_owner(&bus).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    let origin = node_a.clone();
    let pending = tokio::spawn(async move {
        origin
            .invoke_connection("c1", InvocationMessage::new("ask", vec![]))
            .await
    });

    let request = json_body(&recv(&mut rx).await);
    assert_eq!(node_b.unanswered_invocations(), 1);

    let invocation_id = request["invocationId"].as_str().unwrap().to_string();
    let completion = CompletionMessage::with_result(invocation_id.clone(), json!(1));
    let bytes = JsonHubProtocol
        .write_message(&HubMessage::Completion(completion))
        .unwrap();
    assert_ok!(node_b.complete_client_result(&invocation_id, "json", bytes).await);
    assert_eq!(node_b.unanswered_invocations(), 0);

    let completion = assert_ok!(pending.await.unwrap());
    assert_eq!(completion.result, Some(json!(1)));

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_drops_unanswered_routes() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = patient_owner(&bus).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);
    let (other, _other_rx) = LocalConnection::new("c2", "json");
    assert_ok!(node_b.on_connected(other).await);

    for _ in 0..3 {
        let result = node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await;
        assert_err!(result, BackplaneError::ClientResultTimeout { .. });
        recv(&mut rx).await;
    }
    let origin = node_a.clone();
    let other_pending = tokio::spawn(async move {
        origin
            .invoke_connection("c2", InvocationMessage::new("ask", vec![]))
            .await
    });
    eventually(|| node_b.unanswered_invocations() == 4).await;

    assert_ok!(node_b.on_disconnected("c1").await);
    // Routes for other connections stay
    assert_eq!(node_b.unanswered_invocations(), 1);

    assert_err!(other_pending.await.unwrap(), BackplaneError::ClientResultTimeout { .. });
    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_routes_expire_after_client_result_timeout() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, _rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    for _ in 0..5 {
        let result = node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await;
        assert_err!(result, BackplaneError::ClientResultTimeout { .. });
    }

    // The connection is still here; the sweep alone clears the routes
    eventually(|| node_b.unanswered_invocations() == 0).await;
    assert!(node_b.is_local("c1"));

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_no_route_is_kept_when_the_transport_is_gone() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = patient_owner(&bus).await;

    let (connection, rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);
    drop(rx);

    let result = node_a.invoke_connection("c1", InvocationMessage::new("ask", vec![])).await;
    assert_err!(result, BackplaneError::ClientResultTimeout { .. });
    assert_eq!(node_b.unanswered_invocations(), 0);

    node_a.shutdown().await;
    node_b.shutdown().await;
}
