//! Group membership integration tests

use std::sync::Arc;

use pretty_assertions::assert_eq;
use xfbackplane::backend::ack::CommandIdGenerator;
use xfbackplane::backend::error::BackplaneError;
use xfbackplane::backend::protocol::{decode_ack, decode_group_command, GroupAction, GroupCommand};
use xfbackplane::backend::realtime::{MemoryPubSub, PubSub};
use xfbackplane::backend::server::{BackplaneNode, LocalConnection};
use xfbackplane::shared::InvocationMessage;

use crate::common::*;
use crate::{assert_err, assert_ok};

#[tokio::test]
async fn test_local_join_receives_group_messages() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node.on_connected(connection).await);
    assert_ok!(node.add_to_group("c1", "g1").await);
    assert_eq!(node.groups_of("c1"), vec!["g1".to_string()]);

    assert_ok!(node.send_group("g1", InvocationMessage::new("hello", vec![])).await);
    assert_eq!(json_target(&recv(&mut rx).await), "hello");

    node.shutdown().await;
}

#[tokio::test]
async fn test_remote_join_publishes_command_and_waits_for_ack() {
    let bus = Arc::new(MemoryPubSub::new());
    let dyn_bus: Arc<dyn PubSub> = bus.clone();
    let node_a = BackplaneNode::start_with_ids(
        config("server-a", &["json"]),
        dyn_bus,
        registry(&["json"]),
        Arc::new(CommandIdGenerator::starting_after(41)),
    )
    .await
    .expect("node starts");
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let mut commands = tap(&bus, "test:internal:groups").await;
    let mut acks = tap(&bus, "test:internal:ack:server-a").await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);

    assert_ok!(node_a.add_to_group("c1", "g1").await);

    let command = decode_group_command(commands.recv().await.unwrap()).unwrap();
    assert_eq!(
        command,
        GroupCommand {
            id: 42,
            server_name: "server-a".to_string(),
            action: GroupAction::Add,
            group_name: "g1".to_string(),
            connection_id: "c1".to_string(),
        }
    );
    assert_eq!(decode_ack(acks.recv().await.unwrap()).unwrap().id, 42);

    // Membership lives on the owning server
    assert_eq!(node_b.groups_of("c1"), vec!["g1".to_string()]);
    assert!(node_a.groups_of("c1").is_empty());

    assert_ok!(node_a.send_group("g1", InvocationMessage::new("welcome", vec![])).await);
    assert_eq!(json_target(&recv(&mut rx).await), "welcome");

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_remote_leave_stops_delivery() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let node_b = start_node(&bus, "server-b", &["json"]).await;

    let (connection, mut rx) = LocalConnection::new("c1", "json");
    assert_ok!(node_b.on_connected(connection).await);
    assert_ok!(node_a.add_to_group("c1", "g1").await);
    assert_ok!(node_a.remove_from_group("c1", "g1").await);

    assert!(node_b.groups_of("c1").is_empty());
    assert_eq!(bus.subscriber_count("test:group:g1"), 0);

    assert_ok!(node_a.send_group("g1", InvocationMessage::new("gone", vec![])).await);
    assert_silent(&mut rx).await;

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_join_for_unknown_connection_times_out() {
    let bus = Arc::new(MemoryPubSub::new());
    let node_a = start_node(&bus, "server-a", &["json"]).await;
    let _node_b = start_node(&bus, "server-b", &["json"]).await;

    let result = node_a.add_to_group("nobody", "g1").await;
    assert_err!(result, BackplaneError::AckCanceled { .. });
}

#[tokio::test]
async fn test_join_after_shutdown_is_canceled() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;
    node.shutdown().await;

    assert_err!(node.add_to_group("remote", "g1").await, BackplaneError::AckCanceled { .. });
}

#[tokio::test]
async fn test_group_channel_is_shared_by_local_members() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let (c1, mut rx1) = LocalConnection::new("c1", "json");
    let (c2, mut rx2) = LocalConnection::new("c2", "json");
    assert_ok!(node.on_connected(c1).await);
    assert_ok!(node.on_connected(c2).await);
    assert_ok!(node.add_to_group("c1", "g1").await);
    assert_ok!(node.add_to_group("c2", "g1").await);
    assert_eq!(bus.subscriber_count("test:group:g1"), 1);

    assert_ok!(node.send_group("g1", InvocationMessage::new("both", vec![])).await);
    assert_eq!(json_target(&recv(&mut rx1).await), "both");
    assert_eq!(json_target(&recv(&mut rx2).await), "both");

    assert_ok!(node.remove_from_group("c1", "g1").await);
    assert_eq!(bus.subscriber_count("test:group:g1"), 1);
    assert_ok!(node.remove_from_group("c2", "g1").await);
    assert_eq!(bus.subscriber_count("test:group:g1"), 0);

    node.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_leaves_every_group() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let (connection, _rx) = LocalConnection::new("c1", "json");
    assert_ok!(node.on_connected(connection).await);
    assert_ok!(node.add_to_group("c1", "g1").await);
    assert_ok!(node.add_to_group("c1", "g2").await);

    assert_ok!(node.on_disconnected("c1").await);
    assert_eq!(bus.subscriber_count("test:group:g1"), 0);
    assert_eq!(bus.subscriber_count("test:group:g2"), 0);
    assert_eq!(bus.subscriber_count("test:connection:c1"), 0);

    node.shutdown().await;
}

#[tokio::test]
async fn test_send_group_except_and_send_groups() {
    let bus = Arc::new(MemoryPubSub::new());
    let node = start_node(&bus, "server-a", &["json"]).await;

    let (c1, mut rx1) = LocalConnection::new("c1", "json");
    let (c2, mut rx2) = LocalConnection::new("c2", "json");
    assert_ok!(node.on_connected(c1).await);
    assert_ok!(node.on_connected(c2).await);
    assert_ok!(node.add_to_group("c1", "g1").await);
    assert_ok!(node.add_to_group("c2", "g1").await);
    assert_ok!(node.add_to_group("c2", "g2").await);

    assert_ok!(
        node.send_group_except("g1", InvocationMessage::new("not-c1", vec![]), &["c1".to_string()])
            .await
    );
    assert_eq!(json_target(&recv(&mut rx2).await), "not-c1");
    assert_silent(&mut rx1).await;

    let groups = vec!["g1".to_string(), "g2".to_string()];
    assert_ok!(node.send_groups(&groups, InvocationMessage::new("multi", vec![])).await);
    assert_eq!(json_target(&recv(&mut rx1).await), "multi");
    // c2 is in both groups and gets one copy per group
    assert_eq!(json_target(&recv(&mut rx2).await), "multi");
    assert_eq!(json_target(&recv(&mut rx2).await), "multi");

    node.shutdown().await;
}
