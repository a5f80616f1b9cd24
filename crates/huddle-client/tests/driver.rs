//! Driver tests against a real hub on an ephemeral port.

use std::time::Duration;

use huddle_client::{
    BackoffPolicy, ClientEvent, DriverConfig, RegistrationClient, Status, spawn,
};
use huddle_core::{User, UserId};
use huddle_server::{HuddleServer, ServerConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestHub {
    registration: RegistrationClient,
    _server: HuddleServer,
}

async fn boot() -> TestHub {
    let server = HuddleServer::new(ServerConfig::default(), None);
    let (addr, _handles) = server.listen().await.unwrap();
    TestHub {
        registration: RegistrationClient::new(format!("http://{addr}")),
        _server: server,
    }
}

fn fast_config(ws_url: String) -> DriverConfig {
    DriverConfig {
        ws_url,
        probe_interval: Duration::from_secs(60),
        policy: BackoffPolicy {
            step: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            max_attempts: 3,
        },
        auto_reconnect: true,
    }
}

async fn wait_for(
    events: &mut mpsc::Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    loop {
        let event = timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("driver stopped");
        if pred(&event) {
            return event;
        }
    }
}

fn roster_shows(event: &ClientEvent, name: &str, online: bool) -> bool {
    matches!(event, ClientEvent::Roster(rows)
        if rows.iter().any(|r| r.name == name && r.is_online == online))
}

#[tokio::test]
async fn connects_and_sees_itself_online() {
    let hub = boot().await;
    let alice = hub.registration.claim("alice").await.unwrap();
    let config = fast_config(hub.registration.ws_url().unwrap());
    let (handle, mut events) = spawn(config, hub.registration.clone(), alice);

    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Connected)).await;
    let _ = wait_for(&mut events, |e| roster_shows(e, "alice", true)).await;

    handle.exit(true).await.unwrap();
    let _ = handle.join().await.unwrap();
}

#[tokio::test]
async fn chat_is_echoed_to_sender() {
    let hub = boot().await;
    let alice = hub.registration.claim("alice").await.unwrap();
    let config = fast_config(hub.registration.ws_url().unwrap());
    let (handle, mut events) = spawn(config, hub.registration.clone(), alice.clone());
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Connected)).await;

    handle.send_chat("hello").await.unwrap();
    let chat = wait_for(&mut events, |e| matches!(e, ClientEvent::Chat(_))).await;
    let ClientEvent::Chat(chat) = chat else { unreachable!() };
    assert_eq!(chat.message, "hello");
    assert_eq!(chat.user.unwrap().id, alice.id);
}

#[tokio::test]
async fn probe_gets_pong() {
    let hub = boot().await;
    let alice = hub.registration.claim("alice").await.unwrap();
    let config = DriverConfig {
        probe_interval: Duration::from_millis(50),
        ..fast_config(hub.registration.ws_url().unwrap())
    };
    let (_handle, mut events) = spawn(config, hub.registration.clone(), alice);
    let _ = wait_for(&mut events, |e| matches!(e, ClientEvent::Pong { .. })).await;
}

#[tokio::test]
async fn exit_releases_the_name() {
    let hub = boot().await;
    let alice = hub.registration.claim("alice").await.unwrap();
    let config = fast_config(hub.registration.ws_url().unwrap());
    let (handle, mut events) = spawn(config, hub.registration.clone(), alice);
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Connected)).await;

    // Unconfirmed exit is a no-op.
    handle.exit(false).await.unwrap();
    handle.refresh_roster().await.unwrap();
    let _ = wait_for(&mut events, |e| roster_shows(e, "alice", true)).await;

    handle.exit(true).await.unwrap();
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Roster(Vec::new())).await;
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Disconnected)).await;
    let _ = handle.join().await.unwrap();

    let again = hub.registration.claim("alice").await.unwrap();
    assert_eq!(again.name, "alice");
}

#[tokio::test]
async fn unissued_identity_is_reclaimed() {
    let hub = boot().await;
    let forged = User {
        id: UserId::from("never-issued"),
        ..User::new("bob")
    };
    let config = fast_config(hub.registration.ws_url().unwrap());
    let (handle, mut events) = spawn(config, hub.registration.clone(), forged);

    let reclaimed = wait_for(&mut events, |e| matches!(e, ClientEvent::Reclaimed(_))).await;
    let ClientEvent::Reclaimed(user) = reclaimed else { unreachable!() };
    assert_eq!(user.name, "bob");
    assert_ne!(user.id, UserId::from("never-issued"));

    // The hub closes the rejected connection; the retry announces the new id.
    let _ = wait_for(&mut events, |e| matches!(e, ClientEvent::Status(Status::Reconnecting { .. }))).await;
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Connected)).await;
    let _ = wait_for(&mut events, |e| roster_shows(e, "bob", true)).await;

    handle.exit(true).await.unwrap();
    let last = handle.join().await.unwrap();
    assert_eq!(last.id, user.id);
}

#[tokio::test]
async fn unreachable_hub_gives_up_after_max_attempts() {
    // Reserve a port, then free it so nothing listens there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registration = RegistrationClient::new(format!("http://{addr}"));
    let config = fast_config(registration.ws_url().unwrap());
    let (_handle, mut events) = spawn(config, registration, User::new("carol"));

    let mut attempts = Vec::new();
    loop {
        let event = wait_for(&mut events, |e| matches!(e, ClientEvent::Status(_))).await;
        match event {
            ClientEvent::Status(Status::Reconnecting { attempt, .. }) => attempts.push(attempt),
            ClientEvent::Status(Status::GaveUp { attempts: n }) => {
                assert_eq!(n, 3);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn dropping_the_handle_exits() {
    let hub = boot().await;
    let alice = hub.registration.claim("alice").await.unwrap();
    let config = fast_config(hub.registration.ws_url().unwrap());
    let (handle, mut events) = spawn(config, hub.registration.clone(), alice);
    let _ = wait_for(&mut events, |e| *e == ClientEvent::Status(Status::Connected)).await;

    let _ = handle.join().await.unwrap();
    let again = hub.registration.claim("alice").await.unwrap();
    assert_eq!(again.name, "alice");
}
