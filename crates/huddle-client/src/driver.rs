//! WebSocket driver: runs [`ReconnectMachine`] effects against a real
//! transport.
//!
//! [`spawn`] starts one task that owns the socket, the reconnect timer and
//! the probe interval. The application talks to it through a
//! [`ClientHandle`] and receives [`ClientEvent`]s on a channel.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_core::protocol::{ChatMessage, ClientMessage, ServerFrame};
use huddle_core::{HubError, RosterEntry, User};
use huddle_settings::ClientSettings;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::api::RegistrationClient;
use crate::errors::ClientError;
use crate::reconnect::{BackoffPolicy, ConnState, Effect, Event, ReconnectMachine, Status};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Upper bound on a single transport open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Driver configuration.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Duplex endpoint, e.g. `ws://localhost:3000/ws`.
    pub ws_url: String,
    /// Application probe period while open.
    pub probe_interval: Duration,
    /// Reconnect backoff.
    pub policy: BackoffPolicy,
    /// Whether unexpected closes are retried.
    pub auto_reconnect: bool,
}

impl DriverConfig {
    /// Config for `ws_url` with timing taken from client settings.
    pub fn from_settings(ws_url: impl Into<String>, settings: &ClientSettings) -> Self {
        Self {
            ws_url: ws_url.into(),
            probe_interval: settings.probe_interval(),
            policy: BackoffPolicy::from(&settings.reconnect),
            auto_reconnect: settings.reconnect.enabled,
        }
    }
}

/// Requests from the application to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Broadcast a chat line.
    Send(String),
    /// Ask the hub for a fresh roster.
    RefreshRoster,
    /// Reconnect now if disconnected.
    Wake,
    /// Leave the hub. Ignored unless `confirmed`.
    Exit {
        /// Whether the user confirmed.
        confirmed: bool,
    },
}

/// Notifications from the driver to the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connection status changed.
    Status(Status),
    /// New roster snapshot. Empty after an exit.
    Roster(Vec<RosterEntry>),
    /// Chat line from any participant, including this one.
    Chat(ChatMessage),
    /// Reply to an application probe.
    Pong {
        /// Time since the probe was sent.
        rtt: Duration,
    },
    /// Error notice from the hub.
    Error {
        /// Stable code.
        code: String,
        /// Detail.
        message: String,
    },
    /// The hub no longer knew this identity; the name was claimed again.
    Reclaimed(User),
    /// A local message for the user (e.g. a chat line that could not be sent).
    Notice(String),
}

/// Handle to a running driver task.
#[derive(Debug)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<User>,
}

impl ClientHandle {
    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::DriverStopped)
    }

    /// Broadcast `text` to the hub.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.command(Command::Send(text.into())).await
    }

    /// Request a roster refresh.
    pub async fn refresh_roster(&self) -> Result<(), ClientError> {
        self.command(Command::RefreshRoster).await
    }

    /// Reconnect now if disconnected.
    pub async fn wake(&self) -> Result<(), ClientError> {
        self.command(Command::Wake).await
    }

    /// Leave the hub if `confirmed`.
    pub async fn exit(&self, confirmed: bool) -> Result<(), ClientError> {
        self.command(Command::Exit { confirmed }).await
    }

    /// Wait for the driver to finish; yields the last identity it used.
    pub async fn join(self) -> Result<User, ClientError> {
        drop(self.commands);
        self.task.await.map_err(|_| ClientError::DriverStopped)
    }
}

/// Start a driver for `user`, already claimed through `registration`.
pub fn spawn(
    config: DriverConfig,
    registration: RegistrationClient,
    user: User,
) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

    let driver = Driver {
        machine: ReconnectMachine::new(config.policy, config.auto_reconnect),
        config,
        registration,
        user,
        socket: None,
        retry: None,
        probe: None,
        ping_sent: None,
        pending: VecDeque::new(),
        commands: cmd_rx,
        commands_open: true,
        events: event_tx,
    };
    let task = tokio::spawn(driver.run());
    (
        ClientHandle {
            commands: cmd_tx,
            task,
        },
        event_rx,
    )
}

enum Wakeup {
    Command(Option<Command>),
    Frame(Option<Result<Message, tungstenite::Error>>),
    Retry,
    Probe,
}

struct Driver {
    config: DriverConfig,
    registration: RegistrationClient,
    user: User,
    machine: ReconnectMachine,
    socket: Option<WsStream>,
    retry: Option<Pin<Box<Sleep>>>,
    probe: Option<Interval>,
    ping_sent: Option<Instant>,
    pending: VecDeque<Event>,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    events: mpsc::Sender<ClientEvent>,
}

impl Driver {
    async fn run(mut self) -> User {
        self.pending.push_back(Event::Start);
        loop {
            while let Some(event) = self.pending.pop_front() {
                let effects = self.machine.handle(event);
                for effect in effects {
                    self.perform(effect).await;
                }
            }
            if self.machine.is_finished() {
                break;
            }

            let wakeup = tokio::select! {
                cmd = self.commands.recv(), if self.commands_open => Wakeup::Command(cmd),
                frame = next_frame(&mut self.socket) => Wakeup::Frame(frame),
                () = retry_elapsed(&mut self.retry) => Wakeup::Retry,
                () = probe_tick(&mut self.probe) => Wakeup::Probe,
            };

            match wakeup {
                Wakeup::Command(Some(command)) => self.on_command(command).await,
                Wakeup::Command(None) => {
                    // Every handle is gone; leave cleanly.
                    self.commands_open = false;
                    self.pending.push_back(Event::Exit { confirmed: true });
                }
                Wakeup::Frame(frame) => self.on_frame(frame).await,
                Wakeup::Retry => {
                    self.retry = None;
                    self.pending.push_back(Event::RetryElapsed);
                }
                Wakeup::Probe => self.pending.push_back(Event::ProbeTick),
            }
        }
        info!(user = %self.user.name, "client driver finished");
        self.user
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => self.open_transport().await,
            Effect::CloseTransport => self.close_transport().await,
            Effect::StartProbe => {
                let period = self.config.probe_interval;
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.probe = Some(interval);
            }
            Effect::StopProbe => {
                self.probe = None;
                self.ping_sent = None;
            }
            Effect::SendPing => {
                self.ping_sent = Some(Instant::now());
                self.transmit(&ClientMessage::Ping).await;
            }
            Effect::SendJoin => {
                let user = self.user.to_ref();
                self.transmit(&ClientMessage::Join { user }).await;
            }
            Effect::RequestRoster => self.transmit(&ClientMessage::GetUsers).await,
            Effect::SendExit => {
                let user = self.user.to_ref();
                self.transmit(&ClientMessage::Exit { user }).await;
            }
            Effect::ScheduleReconnect(delay) => {
                debug!(delay_ms = delay.as_millis(), "reconnect scheduled");
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => self.retry = None,
            Effect::ClearRoster => self.emit(ClientEvent::Roster(Vec::new())).await,
            Effect::Surface(status) => {
                info!(?status, "connection status");
                self.emit(ClientEvent::Status(status)).await;
            }
        }
    }

    async fn open_transport(&mut self) {
        let url = self.config.ws_url.as_str();
        match tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((socket, _response))) => {
                info!(url, "transport open");
                self.socket = Some(socket);
                self.pending.push_back(Event::Opened);
            }
            Ok(Err(e)) => {
                warn!(url, error = %HubError::Transport(e.to_string()), "transport open failed");
                self.pending.push_back(Event::OpenFailed);
            }
            Err(_) => {
                warn!(url, "transport open timed out");
                self.pending.push_back(Event::OpenFailed);
            }
        }
    }

    async fn close_transport(&mut self) {
        match self.socket.as_mut() {
            // The close reply arrives as a stream end, which reports `Closed`.
            Some(socket) => {
                if let Err(e) = socket.close(None).await {
                    debug!("close handshake failed: {e}");
                    self.drop_socket();
                }
            }
            None => self.pending.push_back(Event::Closed),
        }
    }

    fn drop_socket(&mut self) {
        if self.socket.take().is_some() {
            self.pending.push_back(Event::Closed);
        }
    }

    async fn transmit(&mut self, message: &ClientMessage) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode frame: {e}");
                return;
            }
        };
        if let Err(e) = socket.send(Message::Text(json.into())).await {
            warn!(error = %HubError::Transport(e.to_string()), "send failed");
            self.drop_socket();
        }
    }

    async fn emit(&self, event: ClientEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event).await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(text) => {
                if self.machine.state() == ConnState::Open {
                    let user = self.user.to_ref();
                    self.transmit(&ClientMessage::Send { message: text, user })
                        .await;
                } else {
                    self.emit(ClientEvent::Notice("not connected; message not sent".into()))
                        .await;
                }
            }
            Command::RefreshRoster => {
                if self.machine.state() == ConnState::Open {
                    self.transmit(&ClientMessage::GetUsers).await;
                }
            }
            Command::Wake => self.pending.push_back(Event::Wake),
            Command::Exit { confirmed } => self.pending.push_back(Event::Exit { confirmed }),
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => self.on_text(text).await,
                Err(_) => warn!(len = data.len(), "ignoring non-UTF-8 binary frame"),
            },
            // Transport ping/pong is answered by tungstenite; close is
            // reported by the stream ending.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %HubError::Transport(e.to_string()), "transport read failed");
                self.drop_socket();
            }
            None => {
                debug!("transport closed");
                self.drop_socket();
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("ignoring malformed frame: {e}");
                return;
            }
        };
        match frame {
            ServerFrame::Roster(roster) => self.emit(ClientEvent::Roster(roster)).await,
            ServerFrame::Chat(chat) => self.emit(ClientEvent::Chat(chat)).await,
            ServerFrame::Pong => {
                if let Some(sent) = self.ping_sent.take() {
                    let rtt = sent.elapsed();
                    self.emit(ClientEvent::Pong { rtt }).await;
                }
            }
            ServerFrame::Error { code, message } => {
                if code == HubError::IDENTITY_REJECTED {
                    self.reclaim().await;
                } else {
                    self.emit(ClientEvent::Error { code, message }).await;
                }
            }
            ServerFrame::Other(kind) => debug!(kind, "ignoring unhandled frame type"),
        }
    }

    /// The hub refused our identity (typically after a restart). Claim the
    /// same name again so the next connection can announce a valid one.
    async fn reclaim(&mut self) {
        warn!(user_id = %self.user.id, name = %self.user.name, "identity rejected; reclaiming name");
        match self.registration.claim(&self.user.name).await {
            Ok(user) => {
                self.user = user.clone();
                self.emit(ClientEvent::Reclaimed(user)).await;
            }
            Err(e) => {
                warn!("reclaim failed: {e}");
                self.emit(ClientEvent::Error {
                    code: HubError::IDENTITY_REJECTED.to_owned(),
                    message: e.to_string(),
                })
                .await;
                self.pending.push_back(Event::Abandon);
            }
        }
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn probe_tick(probe: &mut Option<Interval>) {
    match probe {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
