//! Integration tests for host loss, reconnection and timers.
//!
//! Time is paused; tests move it with `tokio::time::advance` and then pump
//! every peer so due timers fire.

use std::sync::Arc;
use std::time::Duration;

use queue_sync::board::{QueueAction, QueueBoard, QueueState};
use queue_sync::coordinator::{
    ConnectionState, CoordinatorConfig, DisconnectReason, Role, RoomCoordinator, RoomEvent,
};
use queue_sync::memory::{MemoryNetwork, MemoryTransport};
use queue_sync::room::PeerId;
use queue_sync::session::SyncSession;
use queue_sync::storage::MemoryStore;
use queue_sync::transport::{Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;

type Peer = SyncSession<MemoryTransport, QueueBoard>;

fn peer_with(network: &MemoryNetwork, config: CoordinatorConfig) -> Peer {
    SyncSession::new(
        network.transport(),
        QueueBoard::new(),
        Arc::new(MemoryStore::new()),
        config,
    )
    .unwrap()
}

fn peer(network: &MemoryNetwork) -> Peer {
    peer_with(network, CoordinatorConfig::for_testing())
}

/// Pump until two rounds in a row handle nothing.
///
/// Timers fire at the end of a pump, so a quiet round may still have queued
/// new events.
fn settle(peers: &mut [&mut Peer]) {
    let mut quiet = 0;
    while quiet < 2 {
        let handled: usize = peers.iter_mut().map(|p| p.pump()).sum();
        if handled == 0 {
            quiet += 1;
        } else {
            quiet = 0;
        }
    }
}

/// Advance time in keepalive-sized steps, settling after each.
async fn elapse(total: Duration, peers: &mut [&mut Peer]) {
    let step = Duration::from_millis(110);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::advance(step).await;
        elapsed += step;
        settle(peers);
    }
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

fn board(p: &Peer) -> &QueueState {
    p.coordinator().provider().state()
}

fn host_identity(code: &str) -> PeerId {
    PeerId::new(format!("queue-room-{code}"))
}

/// Host plus one joined client, both settled.
fn room(network: &MemoryNetwork, code: &str, client_config: CoordinatorConfig) -> (Peer, Peer) {
    let mut host = peer(network);
    let mut client = peer_with(network, client_config);
    host.coordinator_mut().create_room_with_id(code).unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().join_room(code).unwrap();
    settle(&mut [&mut host, &mut client]);
    assert!(client.coordinator().is_in_room());
    (host, client)
}

#[tokio::test(start_paused = true)]
async fn test_host_loss_reports_host_lost_after_grace() {
    let network = MemoryNetwork::new();
    let (mut host, mut client) = room(&network, "lobby", CoordinatorConfig::for_testing());
    let mut client_events = client.take_event_rx().unwrap();
    let mut host_events = host.take_event_rx().unwrap();

    assert!(network.evict_peer(&host_identity("lobby")));
    settle(&mut [&mut host, &mut client]);

    assert_eq!(client.coordinator().connection_state(), ConnectionState::Reconnecting);
    assert!(drain(&mut host_events).contains(&RoomEvent::HostChanged {
        is_host: false,
        room_id: None,
    }));
    assert_eq!(host.coordinator().role(), Role::Unset);

    // Still inside the grace window.
    tokio::time::advance(Duration::from_millis(200)).await;
    settle(&mut [&mut client]);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Reconnecting);

    tokio::time::advance(Duration::from_millis(150)).await;
    settle(&mut [&mut client]);

    let events = drain(&mut client_events);
    assert!(events.contains(&RoomEvent::Disconnected(DisconnectReason::HostLost)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, RoomEvent::HostChanged { .. })));
    assert_eq!(client.coordinator().role(), Role::Client);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Disconnected);
    assert!(!client.coordinator().is_host());

    // Nobody took the room over.
    assert!(!network.is_registered(&host_identity("lobby")));
    assert_eq!(client.coordinator().next_deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn test_zombie_host_reconnects_within_grace() {
    let network = MemoryNetwork::new();
    let (mut host, mut client) = room(&network, "zombie", CoordinatorConfig::for_testing());
    let mut client_events = client.take_event_rx().unwrap();
    drain(&mut client_events);

    assert_eq!(network.sever_peer(&host_identity("zombie")), 1);
    // Host doesn't know yet; the stale channel swallows this one.
    host.coordinator_mut()
        .send_action(QueueAction::enqueue("late").to_action().unwrap())
        .unwrap();
    settle(&mut [&mut host, &mut client]);

    let events = drain(&mut client_events);
    assert_eq!(
        events,
        vec![
            RoomEvent::Connection(ConnectionState::Reconnecting),
            RoomEvent::Connection(ConnectionState::Connected),
        ]
    );
    assert_eq!(host.coordinator().peer_count(), 1);
    // Fresh snapshot on the new channel carries what the old one missed.
    assert_eq!(board(&client), board(&host));
    assert_eq!(board(&client).queue[0].name, "late");

    // The cleared grace timer never fires.
    elapse(Duration::from_millis(400), &mut [&mut host, &mut client]).await;
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connected);
    assert!(drain(&mut client_events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_grace_without_reconnect_attempt() {
    let network = MemoryNetwork::new();
    let config = CoordinatorConfig::for_testing().without_grace_reconnect();
    let (mut host, mut client) = room(&network, "patient", config);
    let mut client_events = client.take_event_rx().unwrap();

    network.sever_peer(&host_identity("patient"));
    settle(&mut [&mut host, &mut client]);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Reconnecting);

    tokio::time::advance(Duration::from_millis(350)).await;
    settle(&mut [&mut host, &mut client]);

    assert!(drain(&mut client_events)
        .contains(&RoomEvent::Disconnected(DisconnectReason::HostLost)));
    assert_eq!(client.coordinator().role(), Role::Client);
    // The zombie keeps its identity; the client never claimed it.
    assert!(network.is_registered(&host_identity("patient")));
    assert!(host.coordinator().is_host());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_releases_pending_channel() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);
    let mut client_events = client.take_event_rx().unwrap();

    host.coordinator_mut().create_room_with_id("slow").unwrap();
    settle(&mut [&mut host]);

    network.stall_connections(true);
    client.coordinator_mut().join_room("slow").unwrap();
    settle(&mut [&mut host, &mut client]);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connecting);
    assert_eq!(network.channel_count(), 1);

    tokio::time::advance(Duration::from_millis(550)).await;
    settle(&mut [&mut host, &mut client]);

    assert!(drain(&mut client_events)
        .contains(&RoomEvent::Disconnected(DisconnectReason::ConnectionTimeout)));
    assert_eq!(client.coordinator().role(), Role::Client);
    assert_eq!(network.channel_count(), 0);
    assert_eq!(host.coordinator().peer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_host_drops_silent_peer() {
    let network = MemoryNetwork::new();
    let config = CoordinatorConfig::for_testing().with_idle_timeout(Duration::from_millis(250));
    let mut host = peer_with(&network, config.clone());
    let mut live = peer_with(&network, config);
    let mut host_events = host.take_event_rx().unwrap();

    host.coordinator_mut().create_room_with_id("quiet").unwrap();
    settle(&mut [&mut host]);
    live.coordinator_mut().join_room("quiet").unwrap();

    // A peer that opens a channel and never speaks.
    let mut mute = network.transport();
    let mut mute_rx = mute.take_event_rx().unwrap();
    mute.register(Some(PeerId::new("mute"))).unwrap();
    mute.connect(&host_identity("quiet")).unwrap();
    settle(&mut [&mut host, &mut live]);
    assert_eq!(host.coordinator().peer_count(), 2);
    drain(&mut mute_rx);

    elapse(Duration::from_millis(440), &mut [&mut host, &mut live]).await;

    assert!(drain(&mut host_events).contains(&RoomEvent::PeerLeft(PeerId::new("mute"))));
    assert_eq!(host.coordinator().peer_count(), 1);
    assert!(drain(&mut mute_rx)
        .iter()
        .any(|e| matches!(e, TransportEvent::ChannelClosed { .. })));
    assert_eq!(live.coordinator().connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_holds_idle_room_open() {
    let network = MemoryNetwork::new();
    let config = CoordinatorConfig::for_testing().with_idle_timeout(Duration::from_millis(250));
    let mut host = peer_with(&network, config.clone());
    let mut client = peer_with(&network, config);

    host.coordinator_mut().create_room_with_id("steady").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().join_room("steady").unwrap();
    settle(&mut [&mut host, &mut client]);
    let mut client_events = client.take_event_rx().unwrap();
    drain(&mut client_events);

    let before = network.frames_delivered();
    elapse(Duration::from_secs(1), &mut [&mut host, &mut client]).await;

    assert!(network.frames_delivered() > before);
    assert!(drain(&mut client_events).is_empty());
    assert_eq!(host.coordinator().peer_count(), 1);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_client_reconnects_to_silent_host() {
    let network = MemoryNetwork::new();
    let config = CoordinatorConfig::for_testing().with_idle_timeout(Duration::from_millis(250));
    let mut client = peer_with(&network, config);
    let mut client_events = client.take_event_rx().unwrap();

    // Host identity held by an endpoint that accepts channels but never talks.
    let mut mute_host = network.transport();
    let mut mute_rx = mute_host.take_event_rx().unwrap();
    mute_host.register(Some(host_identity("mute"))).unwrap();

    client.coordinator_mut().join_room("mute").unwrap();
    settle(&mut [&mut client]);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connected);
    drain(&mut client_events);

    elapse(Duration::from_millis(330), &mut [&mut client]).await;

    let events = drain(&mut client_events);
    assert!(events.contains(&RoomEvent::Connection(ConnectionState::Reconnecting)));
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connected);
    let incoming = drain(&mut mute_rx)
        .into_iter()
        .filter(|e| matches!(e, TransportEvent::IncomingChannel { .. }))
        .count();
    assert_eq!(incoming, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rendezvous_loss_ends_client_session() {
    let network = MemoryNetwork::new();
    let (mut host, mut client) = room(&network, "flaky", CoordinatorConfig::for_testing());
    let mut client_events = client.take_event_rx().unwrap();
    let mut host_events = host.take_event_rx().unwrap();
    let client_id = client.coordinator().local_peer_id().unwrap().clone();

    network.evict_peer(&client_id);
    settle(&mut [&mut host, &mut client]);

    assert!(drain(&mut client_events).contains(&RoomEvent::Disconnected(
        DisconnectReason::TransportError(TransportError::ConnectionLost(
            "evicted from rendezvous".into()
        ))
    )));
    assert_eq!(client.coordinator().role(), Role::Client);
    assert_eq!(client.coordinator().local_peer_id(), None);
    assert!(drain(&mut host_events).contains(&RoomEvent::PeerLeft(client_id)));
    assert!(host.coordinator().is_in_room());
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_host_returns() {
    let network = MemoryNetwork::new();
    let (mut host, mut client) = room(&network, "phoenix", CoordinatorConfig::for_testing());
    host.coordinator_mut()
        .send_action(QueueAction::enqueue("ana").to_action().unwrap())
        .unwrap();
    settle(&mut [&mut host, &mut client]);

    network.evict_peer(&host_identity("phoenix"));
    settle(&mut [&mut host, &mut client]);
    tokio::time::advance(Duration::from_millis(350)).await;
    settle(&mut [&mut host, &mut client]);
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Disconnected);

    // Host comes back with its board intact and hosts again.
    host.coordinator_mut().create_room_with_id("phoenix").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().rejoin_last_room().unwrap();
    settle(&mut [&mut host, &mut client]);

    assert!(client.coordinator().is_in_room());
    assert_eq!(board(&client).queue[0].name, "ana");
}

#[tokio::test(start_paused = true)]
async fn test_actions_replay_after_reconnect() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    host.coordinator_mut().create_room_with_id("replay").unwrap();
    settle(&mut [&mut host]);

    // Driven by hand so an action can be slipped in between events.
    let mut transport = network.transport();
    let mut rx = transport.take_event_rx().unwrap();
    let mut client = RoomCoordinator::new(
        transport,
        QueueBoard::new(),
        Arc::new(MemoryStore::new()),
        CoordinatorConfig::for_testing(),
    );
    client.join_room("replay").unwrap();
    loop {
        let mut handled = 0;
        while let Ok(event) = rx.try_recv() {
            client.handle_transport_event(event);
            handled += 1;
        }
        handled += host.pump();
        if handled == 0 {
            break;
        }
    }
    assert!(client.is_in_room());

    network.sever_peer(&host_identity("replay"));
    let closed = rx.try_recv().unwrap();
    assert!(matches!(closed, TransportEvent::ChannelClosed { .. }));
    client.handle_transport_event(closed);
    assert_eq!(client.connection_state(), ConnectionState::Reconnecting);

    let action = QueueAction::enqueue("queued").to_action().unwrap();
    assert_eq!(client.send_action(action).unwrap(), 0);
    assert_eq!(client.queued_actions(), 1);

    loop {
        let mut handled = 0;
        while let Ok(event) = rx.try_recv() {
            client.handle_transport_event(event);
            handled += 1;
        }
        handled += host.pump();
        if handled == 0 {
            break;
        }
    }

    assert_eq!(client.queued_actions(), 0);
    assert_eq!(board(&host).queue[0].name, "queued");
    assert_eq!(client.provider().state(), board(&host));
}
