//! Integration tests for the connection registry and the connection pumps.
//!
//! Connections are in-memory WebSocket pairs: the server end is attached to
//! a real [`ConnectionRegistry`] (real pumps, real timers) and the test
//! drives the client end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

use common::{
    check_for, next_binary, recording_broadcast, recv_within, ws_pair, ws_pair_sized, Event, RecordingApp,
};
use wsrelay_core::BinaryBuffer;
use wsrelay_hub::domain::HubConfig;
use wsrelay_hub::infrastructure::{ConnectionRegistry, HubError};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn registry_with(config: HubConfig) -> Arc<ConnectionRegistry> {
    let (handler, _rx) = recording_broadcast();
    ConnectionRegistry::start(config, handler)
}

// ── Registration and removal ─────────────────────────────────────────────────

#[tokio::test]
async fn test_registered_connection_is_counted_by_selective_send() {
    // Arrange
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server, _client) = ws_pair(&config).await;

    // Act
    let handle = registry.attach(RecordingApp::new(1, events), server);

    // Assert
    assert!(registry.contains(handle.id()));
    let matched = registry.selective_send(&check_for(1), None).await.unwrap();
    assert_eq!(matched, 1);
}

#[tokio::test]
async fn test_removed_connection_is_gone_everywhere() {
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server, _client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    assert_ok!(registry.remove(id));

    assert!(!registry.contains(id));
    assert_eq!(registry.selective_send(&check_for(1), None).await.unwrap(), 0);
    assert!(matches!(
        registry.send_to_one(id, vec![1]).await,
        Err(HubError::UnknownConnection(got)) if got == id
    ));
    assert!(matches!(registry.remove(id), Err(HubError::UnknownConnection(_))));
}

#[tokio::test]
async fn test_remove_sends_close_to_peer() {
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    registry.remove(id).unwrap();

    let msg = tokio::time::timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(msg, Message::Close(_)), "got {msg:?}");
}

// ── Sends ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_selective_send_reaches_only_matching_connection() {
    // Arrange: ids 1 and 2, tagged 1 and 2
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server1, mut client1) = ws_pair(&config).await;
    let (server2, mut client2) = ws_pair(&config).await;
    let first = registry.attach(RecordingApp::new(1, events.clone()), server1).id();
    let second = registry.attach(RecordingApp::new(2, events), server2).id();
    assert_eq!((first, second), (1, 2));

    let mut payload = BinaryBuffer::new(16);
    payload.append_string("P").unwrap();

    // Act
    let matched = registry
        .selective_send(&check_for(2), Some(&payload))
        .await
        .unwrap();

    // Assert
    assert_eq!(matched, 1);
    assert_eq!(
        next_binary(&mut client2, WAIT).await,
        Some(vec![0x00, 0x01, 0x00, b'P'])
    );
    assert_eq!(next_binary(&mut client1, QUIET).await, None);
}

#[tokio::test]
async fn test_prepare_outbound_transforms_payload() {
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry
        .attach(RecordingApp::with_prefix(1, 0xEE, events), server)
        .id();

    registry.send_to_one(id, vec![1, 2]).await.unwrap();

    assert_eq!(next_binary(&mut client, WAIT).await, Some(vec![0xEE, 1, 2]));
}

#[tokio::test]
async fn test_concurrent_sends_arrive_once_and_in_order() {
    // Arrange: eight connections
    const CONNECTIONS: u8 = 8;
    const PER_CONNECTION: u8 = 20;
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let mut clients = Vec::new();
    for tag in 0..CONNECTIONS {
        let (server, client) = ws_pair(&config).await;
        let id = registry.attach(RecordingApp::new(u32::from(tag), events.clone()), server).id();
        clients.push((id, client));
    }

    // Act: one sending task per connection
    let mut senders = Vec::new();
    for (n, (id, _)) in clients.iter().enumerate() {
        let registry = Arc::clone(&registry);
        let id = *id;
        let n = n as u8;
        senders.push(tokio::spawn(async move {
            for seq in 0..PER_CONNECTION {
                registry.send_to_one(id, vec![n, seq]).await.unwrap();
            }
        }));
    }
    for sender in senders {
        sender.await.unwrap();
    }

    // Assert: coalescing may merge payloads, so compare the byte stream
    for (n, (_, client)) in clients.iter_mut().enumerate() {
        let expected: Vec<u8> = (0..PER_CONNECTION).flat_map(|seq| [n as u8, seq]).collect();
        let mut received = Vec::new();
        while received.len() < expected.len() {
            let chunk = next_binary(client, WAIT).await.expect("payload missing");
            received.extend(chunk);
        }
        assert_eq!(received, expected);
    }
}

#[tokio::test]
async fn test_full_outbound_queue_makes_senders_wait() {
    // Arrange: two-slot queue behind a pipe the peer does not read
    let config = HubConfig {
        outbound_capacity: 2,
        ..HubConfig::default()
    };
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair_sized(&config, 256).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    // Act: send until one send stops making progress
    let mut blocked = false;
    for n in 0..10u8 {
        match tokio::time::timeout(QUIET, registry.send_to_one(id, vec![n; 4096])).await {
            Ok(result) => assert_ok!(result),
            Err(_) => {
                blocked = true;
                break;
            }
        }
    }
    assert!(blocked, "outbound queue never filled");

    let direct = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.send_to_one(id, vec![0xD0; 8]).await })
    };
    let selective = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let payload = BinaryBuffer::from_bytes(0, vec![0x5E; 8]);
            registry.selective_send(&check_for(1), Some(&payload)).await
        })
    };
    tokio::time::sleep(QUIET).await;

    // Assert: both wait, neither fails
    assert!(!direct.is_finished());
    assert!(!selective.is_finished());

    // Act: the peer starts reading
    tokio::spawn(async move { while let Some(Ok(_)) = client.next().await {} });

    // Assert: the waiting sends go through
    let direct = tokio::time::timeout(WAIT, direct).await.unwrap().unwrap();
    assert_ok!(direct);
    let selective = tokio::time::timeout(WAIT, selective).await.unwrap().unwrap();
    assert_eq!(selective.unwrap(), 1);
    assert!(registry.contains(id));
}

// ── Inbound pump ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_binary_frame_reaches_application() {
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, mut rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    client.send(Message::Binary(vec![0x01, 0x02].into())).await.unwrap();

    assert_eq!(
        recv_within(&mut rx, WAIT).await,
        Some(Event::Message(id, vec![0x01, 0x02]))
    );
}

#[tokio::test]
async fn test_text_frame_disconnects_once_and_remove_succeeds_once() {
    // Arrange
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, mut rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    // Act
    client.send(Message::Text("hello".into())).await.unwrap();

    // Assert
    assert_eq!(recv_within(&mut rx, WAIT).await, Some(Event::Disconnected(id)));
    assert_eq!(recv_within(&mut rx, QUIET).await, None);
    assert_ok!(registry.remove(id));
    assert!(matches!(registry.remove(id), Err(HubError::UnknownConnection(_))));
}

#[tokio::test]
async fn test_oversized_message_disconnects() {
    let config = HubConfig {
        max_message_size: 64,
        ..HubConfig::default()
    };
    let registry = registry_with(config.clone());
    let (events, mut rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    client.send(Message::Binary(vec![0u8; 1024].into())).await.unwrap();

    assert_eq!(recv_within(&mut rx, WAIT).await, Some(Event::Disconnected(id)));
}

#[tokio::test]
async fn test_silent_peer_hits_read_deadline() {
    // Arrange: the client never reads, so it never answers a ping
    let config = HubConfig {
        pong_wait: Duration::from_millis(300),
        ..HubConfig::default()
    };
    let registry = registry_with(config.clone());
    let (events, mut rx) = mpsc::unbounded_channel();
    let (server, _client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();

    // Act / Assert
    assert_eq!(recv_within(&mut rx, WAIT).await, Some(Event::Disconnected(id)));
}

#[tokio::test]
async fn test_ponging_peer_stays_connected() {
    // Arrange: the client keeps reading, which makes tungstenite answer pings
    let config = HubConfig {
        pong_wait: Duration::from_millis(1000),
        ..HubConfig::default()
    };
    let registry = registry_with(config.clone());
    let (events, mut rx) = mpsc::unbounded_channel();
    let (server, mut client) = ws_pair(&config).await;
    let id = registry.attach(RecordingApp::new(1, events), server).id();
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = client.next().await {} });

    // Act: wait several deadline windows
    let event = recv_within(&mut rx, Duration::from_millis(2500)).await;

    // Assert
    assert_eq!(event, None);
    assert!(registry.contains(id));
    reader.abort();
}

// ── Broadcast intake and status ──────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_intake_reaches_handler() {
    let (handler, mut rx) = recording_broadcast();
    let registry = ConnectionRegistry::start(HubConfig::default(), handler);

    registry.broadcast_intake(vec![9, 8, 7]).unwrap();

    assert_eq!(recv_within(&mut rx, WAIT).await, Some(vec![9, 8, 7]));
}

#[tokio::test]
async fn test_status_rows_list_every_connection() {
    let config = HubConfig::default();
    let registry = registry_with(config.clone());
    let (events, _rx) = mpsc::unbounded_channel();
    let (server1, _c1) = ws_pair(&config).await;
    let (server2, _c2) = ws_pair(&config).await;
    registry.attach(RecordingApp::new(10, events.clone()), server1);
    registry.attach(RecordingApp::new(20, events), server2);

    assert_eq!(
        registry.status_rows(),
        "<tr><td scope=\"row\">1</td><td>tag 10</td></tr>\
         <tr><td scope=\"row\">2</td><td>tag 20</td></tr>"
    );
}
