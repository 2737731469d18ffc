//! Integration tests for room lifecycle and host-authoritative replication.
//!
//! Every peer runs a real coordinator with a queue board over the in-process
//! network; time is paused so nothing fires unless a test advances it.

use std::sync::Arc;

use queue_sync::board::{QueueAction, QueueBoard, QueueState};
use queue_sync::coordinator::{
    ConnectionState, CoordinatorConfig, CoordinatorError, DisconnectReason, Role, RoomEvent,
};
use queue_sync::memory::{MemoryNetwork, MemoryTransport};
use queue_sync::protocol::Message;
use queue_sync::room::{PeerId, RoomId};
use queue_sync::session::SyncSession;
use queue_sync::storage::{FileStore, KeyValueStore, MemoryStore};
use queue_sync::transport::{ChannelId, Transport, TransportEvent};
use tokio::sync::mpsc;

type Peer = SyncSession<MemoryTransport, QueueBoard>;

fn peer(network: &MemoryNetwork) -> Peer {
    SyncSession::new(
        network.transport(),
        QueueBoard::new(),
        Arc::new(MemoryStore::new()),
        CoordinatorConfig::for_testing(),
    )
    .unwrap()
}

/// Pump every peer until no transport events remain anywhere.
fn settle(peers: &mut [&mut Peer]) {
    loop {
        let handled: usize = peers.iter_mut().map(|p| p.pump()).sum();
        if handled == 0 {
            break;
        }
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

fn act(p: &mut Peer, action: QueueAction) -> Result<usize, CoordinatorError> {
    p.coordinator_mut().send_action(action.to_action().unwrap())
}

fn enqueue(name: &str) -> QueueAction {
    QueueAction::Enqueue {
        name: name.into(),
        timestamp: 1_700_000_000_000,
    }
}

/// Bare endpoint that speaks the room protocol by hand.
struct RawPeer {
    transport: MemoryTransport,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl RawPeer {
    fn new(network: &MemoryNetwork, name: &str) -> Self {
        let mut transport = network.transport();
        let rx = transport.take_event_rx().unwrap();
        transport.register(Some(PeerId::new(name))).unwrap();
        Self { transport, rx }
    }

    fn messages(&mut self) -> Vec<Message> {
        drain(&mut self.rx)
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Data { payload, .. } => Some(Message::decode(&payload).unwrap()),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_room_code_normalization_reaches_host() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);

    let created = host.coordinator_mut().create_room_with_id("SNIPER42").unwrap();
    settle(&mut [&mut host]);
    let joined = client.coordinator_mut().join_room("sniper42 ").unwrap();
    settle(&mut [&mut host, &mut client]);

    assert_eq!(created, joined);
    assert_eq!(created.host_identity(), RoomId::parse(" Sniper42").unwrap().host_identity());
    assert!(network.is_registered(&PeerId::new("queue-room-sniper42")));
    assert!(client.coordinator().is_in_room());
    assert!(!client.coordinator().is_host());
    assert_eq!(
        host.coordinator().peers(),
        vec![client.coordinator().local_peer_id().unwrap().clone()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_generated_room_is_joinable() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);

    let room = host.coordinator_mut().create_room().unwrap();
    settle(&mut [&mut host]);
    client
        .coordinator_mut()
        .join_room(&room.display_code())
        .unwrap();
    settle(&mut [&mut host, &mut client]);

    assert_eq!(client.coordinator().room_id(), Some(&room));
    assert_eq!(client.coordinator().connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_host_action_reaches_every_client() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut a = peer(&network);
    let mut b = peer(&network);
    let mut c = peer(&network);

    host.coordinator_mut().create_room_with_id("squad1").unwrap();
    settle(&mut [&mut host]);
    for client in [&mut a, &mut b, &mut c] {
        client.coordinator_mut().join_room("squad1").unwrap();
    }
    settle(&mut [&mut host, &mut a, &mut b, &mut c]);
    assert_eq!(host.coordinator().peer_count(), 3);

    // Applied on the host before anything goes out.
    assert_eq!(act(&mut host, enqueue("ana")).unwrap(), 3);
    assert_eq!(board(&host).queue.len(), 1);

    settle(&mut [&mut host, &mut a, &mut b, &mut c]);
    for client in [&a, &b, &c] {
        assert_eq!(board(client), board(&host));
    }
}

#[tokio::test(start_paused = true)]
async fn test_client_action_waits_for_host() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);

    host.coordinator_mut().create_room_with_id("squad2").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().join_room("squad2").unwrap();
    settle(&mut [&mut host, &mut client]);

    assert_eq!(act(&mut client, enqueue("bo")).unwrap(), 1);
    assert!(board(&client).queue.is_empty());

    settle(&mut [&mut host, &mut client]);
    assert_eq!(board(&host).queue[0].name, "bo");
    assert_eq!(board(&client), board(&host));
}

#[tokio::test(start_paused = true)]
async fn test_forwarded_action_skips_origin() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut b = peer(&network);

    host.coordinator_mut().create_room_with_id("squad3").unwrap();
    settle(&mut [&mut host]);
    act(&mut host, enqueue("ana")).unwrap();

    let mut a = RawPeer::new(&network, "client-a");
    let channel = a.transport.connect(&PeerId::new("queue-room-squad3")).unwrap();
    b.coordinator_mut().join_room("squad3").unwrap();
    settle(&mut [&mut host, &mut b]);
    assert_eq!(a.messages().len(), 1);

    let call_next = Message::action(QueueAction::CallNext.to_action().unwrap());
    a.transport.send(channel, &call_next.encode().unwrap()).unwrap();
    settle(&mut [&mut host, &mut b]);

    // B got the action, A only the confirming snapshot.
    assert_eq!(board(&b).team[0].name, "ana");
    let back_to_a = a.messages();
    assert_eq!(back_to_a.len(), 1);
    match &back_to_a[0] {
        Message::StateUpdate { data } => {
            assert_eq!(data, &serde_json::to_value(board(&host)).unwrap());
        }
        other => panic!("expected STATE_UPDATE, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_gets_one_snapshot_first() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);

    host.coordinator_mut().create_room_with_id("squad4").unwrap();
    settle(&mut [&mut host]);
    act(&mut host, enqueue("ana")).unwrap();
    act(&mut host, enqueue("bo")).unwrap();
    act(&mut host, QueueAction::CallNext).unwrap();
    let snapshot = serde_json::to_value(board(&host)).unwrap();

    let mut late = RawPeer::new(&network, "late");
    late.transport.connect(&PeerId::new("queue-room-squad4")).unwrap();
    settle(&mut [&mut host]);
    act(&mut host, enqueue("cy")).unwrap();

    let messages = late.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], Message::state_update(snapshot));
    assert!(matches!(messages[1], Message::Action { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_host_action_is_not_broadcast() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);

    host.coordinator_mut().create_room_with_id("squad5").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().join_room("squad5").unwrap();
    settle(&mut [&mut host, &mut client]);

    let result = act(&mut host, QueueAction::CallNext);
    assert!(matches!(result, Err(CoordinatorError::ActionRejected(_))));
    assert_eq!(host.coordinator().broadcast_stats().messages_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_room_name_taken_is_not_retried() {
    let network = MemoryNetwork::new();
    let mut first = peer(&network);
    let mut second = peer(&network);
    let mut events = second.take_event_rx().unwrap();

    first.coordinator_mut().create_room_with_id("arena").unwrap();
    settle(&mut [&mut first]);
    let room = second.coordinator_mut().create_room_with_id("ARENA").unwrap();
    settle(&mut [&mut first, &mut second]);

    let events = drain(&mut events);
    assert!(events.contains(&RoomEvent::Disconnected(DisconnectReason::RoomNameTaken(room))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, RoomEvent::HostChanged { is_host: true, .. })));
    assert_eq!(second.coordinator().role(), Role::Unset);
    assert_eq!(second.coordinator().connection_state(), ConnectionState::Disconnected);
    assert!(first.coordinator().is_host());
    assert!(first.coordinator().is_in_room());

    // No registration traffic afterwards.
    assert_eq!(second.pump(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_join_unknown_room_keeps_client_role() {
    let network = MemoryNetwork::new();
    let mut client = peer(&network);
    let mut events = client.take_event_rx().unwrap();

    let room = client.coordinator_mut().join_room("ghost99").unwrap();
    settle(&mut [&mut client]);

    assert!(drain(&mut events)
        .contains(&RoomEvent::Disconnected(DisconnectReason::RoomNotFound(room.clone()))));
    assert_eq!(client.coordinator().role(), Role::Client);
    assert!(!client.coordinator().is_in_room());
    assert_eq!(client.coordinator().saved_room_id(), Some(room));
    assert_eq!(network.channel_count(), 0);

    // Once someone hosts it, the saved code can be rejoined.
    let mut host = peer(&network);
    host.coordinator_mut().create_room_with_id("ghost99").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().rejoin_last_room().unwrap();
    settle(&mut [&mut host, &mut client]);
    assert!(client.coordinator().is_in_room());
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_without_saved_room() {
    let network = MemoryNetwork::new();
    let mut client = peer(&network);
    assert_eq!(
        client.coordinator_mut().rejoin_last_room(),
        Err(CoordinatorError::NoSavedRoom)
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_twice() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);
    let mut host_events = host.take_event_rx().unwrap();

    host.coordinator_mut().create_room_with_id("squad6").unwrap();
    settle(&mut [&mut host]);
    client.coordinator_mut().join_room("squad6").unwrap();
    settle(&mut [&mut host, &mut client]);
    let client_id = client.coordinator().local_peer_id().unwrap().clone();

    client.coordinator_mut().disconnect();
    assert_eq!(client.coordinator().role(), Role::Unset);
    client.coordinator_mut().disconnect();
    assert_eq!(client.coordinator().role(), Role::Unset);
    assert_eq!(client.coordinator().saved_room_id(), None);

    settle(&mut [&mut host, &mut client]);
    assert!(drain(&mut host_events).contains(&RoomEvent::PeerLeft(client_id)));
    assert_eq!(host.coordinator().peer_count(), 0);
    assert!(host.coordinator().is_in_room());
}

#[tokio::test(start_paused = true)]
async fn test_actions_queued_while_joining() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    let mut client = peer(&network);

    host.coordinator_mut().create_room_with_id("squad7").unwrap();
    settle(&mut [&mut host]);

    client.coordinator_mut().join_room("squad7").unwrap();
    assert_eq!(act(&mut client, enqueue("early")).unwrap(), 0);
    assert_eq!(client.coordinator().queued_actions(), 1);

    settle(&mut [&mut host, &mut client]);
    assert_eq!(client.coordinator().queued_actions(), 0);
    assert_eq!(board(&host).queue[0].name, "early");
    assert_eq!(board(&client), board(&host));
}

#[tokio::test(start_paused = true)]
async fn test_client_send_without_room_link() {
    let network = MemoryNetwork::new();
    let mut client = peer(&network);
    client.coordinator_mut().join_room("nobody").unwrap();
    settle(&mut [&mut client]);

    assert_eq!(act(&mut client, enqueue("x")), Err(CoordinatorError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_switching_rooms_tears_down_first() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);

    host.coordinator_mut().create_room_with_id("first").unwrap();
    settle(&mut [&mut host]);
    host.coordinator_mut().create_room_with_id("second").unwrap();
    settle(&mut [&mut host]);

    assert!(!network.is_registered(&PeerId::new("queue-room-first")));
    assert!(network.is_registered(&PeerId::new("queue-room-second")));
    assert_eq!(host.coordinator().room_id().map(RoomId::as_str), Some("second"));
}

#[tokio::test(start_paused = true)]
async fn test_host_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let network = MemoryNetwork::new();

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
        let board = QueueBoard::load(store.clone()).unwrap();
        let mut host: Peer = SyncSession::new(
            network.transport(),
            board,
            store,
            CoordinatorConfig::for_testing(),
        )
        .unwrap();
        host.coordinator_mut().create_room_with_id("keeper").unwrap();
        settle(&mut [&mut host]);
        act(&mut host, enqueue("ana")).unwrap();
        act(&mut host, enqueue("bo")).unwrap();
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&path).unwrap());
    let board = QueueBoard::load(store.clone()).unwrap();
    assert_eq!(board.state().queue.len(), 2);
    assert_eq!(board.state().current_ticket, 3);

    let host: Peer =
        SyncSession::new(network.transport(), board, store, CoordinatorConfig::for_testing())
            .unwrap();
    assert_eq!(
        host.coordinator().saved_room_id().map(|r| r.display_code()),
        Some("KEEPER".to_string())
    );
    assert_eq!(
        host.coordinator().saved_peer_id(),
        Some(PeerId::new("queue-room-keeper"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_channel_data_is_dropped() {
    let network = MemoryNetwork::new();
    let mut host = peer(&network);
    host.coordinator_mut().create_room_with_id("squad8").unwrap();
    settle(&mut [&mut host]);

    host.coordinator_mut()
        .handle_transport_event(TransportEvent::Data {
            channel: ChannelId::new(),
            payload: Message::action(enqueue("sneaky").to_action().unwrap())
                .encode()
                .unwrap(),
        });
    assert!(board(&host).queue.is_empty());
}
