//! Terminal chat client.
//!
//! Lines typed on stdin are broadcast; lines starting with `/` are commands.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use huddle_client::{
    ClientEvent, ClientHandle, DriverConfig, RegistrationClient, StateStore, Status,
    validate_nickname,
};
use huddle_core::{RosterEntry, User};
use huddle_settings::{ClientSettings, huddle_home};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};

type Input = Lines<BufReader<Stdin>>;

/// A parsed line of user input.
#[derive(Debug, PartialEq, Eq)]
enum InputLine<'a> {
    Chat(&'a str),
    Users,
    Reconnect,
    Exit,
    Help,
    Unknown(&'a str),
    Empty,
}

impl<'a> InputLine<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        match line.strip_prefix('/') {
            None => Self::Chat(line),
            Some("users") => Self::Users,
            Some("reconnect") => Self::Reconnect,
            Some("exit" | "quit") => Self::Exit,
            Some("help") => Self::Help,
            Some(other) => Self::Unknown(other),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn confirm(input: &mut Input, question: &str) -> bool {
    println!("{question} [y/N]");
    match input.next_line().await {
        Ok(Some(answer)) => is_yes(&answer),
        _ => false,
    }
}

/// Release a name left behind by a session that ended without exiting.
async fn release_stale_name(registration: &RegistrationClient, store: &StateStore, stale_after: Duration) {
    let state = store.load();
    let Some(name) = state.stale_name(Utc::now(), stale_after) else {
        return;
    };
    info!(name, "releasing name from an abandoned session");
    if let Err(e) = registration.force_remove(name).await {
        warn!("failed to release stale name: {e}");
    }
    if let Err(e) = store.clear() {
        warn!("failed to clear client state: {e}");
    }
}

fn format_roster(roster: &[RosterEntry]) -> String {
    if roster.is_empty() {
        return "* nobody here".to_string();
    }
    let names: Vec<String> = roster
        .iter()
        .map(|r| {
            if r.is_online {
                r.name.clone()
            } else {
                format!("{} (away)", r.name)
            }
        })
        .collect();
    format!("* here: {}", names.join(", "))
}

fn format_status(status: Status) -> String {
    match status {
        Status::Connecting => "* connecting...".to_string(),
        Status::Connected => "* connected".to_string(),
        Status::Reconnecting { attempt, delay } => {
            format!("* connection lost; retry {attempt} in {}s", delay.as_secs_f32())
        }
        Status::Disconnected => "* disconnected".to_string(),
        Status::GaveUp { attempts } => {
            format!("* gave up after {attempts} attempts; type /reconnect to try again")
        }
    }
}

enum Wakeup {
    Line(std::io::Result<Option<String>>),
    Event(Option<ClientEvent>),
}

/// Claim `name` on the hub at `settings.server_url` and chat until exit.
pub async fn run(settings: &ClientSettings, name: &str) -> Result<()> {
    let name = validate_nickname(name)?.to_string();
    let registration = RegistrationClient::new(settings.server_url.clone());
    let store = StateStore::new(settings.state_path(&huddle_home()));
    let mut input: Input = BufReader::new(tokio::io::stdin()).lines();

    release_stale_name(&registration, &store, settings.stale_after()).await;

    let user = {
        let input = &mut input;
        registration
            .claim_with_takeover(&name, move |taken| {
                let question = format!("\"{taken}\" is in use. Take it over?");
                async move { confirm(input, &question).await }
            })
            .await
            .with_context(|| format!("Failed to claim \"{name}\""))?
    };
    store
        .record_session(&user.name, Utc::now())
        .context("Failed to write client state")?;
    println!("* joined as {}; /help for commands", user.name);

    let ws_url = registration.ws_url()?;
    let config = DriverConfig::from_settings(ws_url, settings);
    let (handle, mut events) = huddle_client::spawn(config, registration, user.clone());

    let mut current = user;
    let mut input_open = true;
    loop {
        let wakeup = tokio::select! {
            line = input.next_line(), if input_open => Wakeup::Line(line),
            event = events.recv() => Wakeup::Event(event),
        };
        match wakeup {
            Wakeup::Line(Ok(Some(line))) => on_line(&handle, &mut input, &line).await?,
            Wakeup::Line(Ok(None) | Err(_)) => {
                // stdin closed: leave without asking
                input_open = false;
                handle.exit(true).await?;
            }
            Wakeup::Event(Some(event)) => on_event(&store, &mut current, event),
            Wakeup::Event(None) => break,
        }
    }

    let last = handle.join().await?;
    debug!(user_id = %last.id, "chat session ended");
    store.clear().context("Failed to clear client state")?;
    Ok(())
}

async fn on_line(handle: &ClientHandle, input: &mut Input, line: &str) -> Result<()> {
    match InputLine::parse(line) {
        InputLine::Empty => {}
        InputLine::Chat(text) => handle.send_chat(text).await?,
        InputLine::Users => handle.refresh_roster().await?,
        InputLine::Reconnect => handle.wake().await?,
        InputLine::Exit => {
            let confirmed = confirm(input, "Leave the chat?").await;
            handle.exit(confirmed).await?;
        }
        InputLine::Help => {
            println!("/users      show who is here");
            println!("/reconnect  reconnect now");
            println!("/exit       leave and release your name");
        }
        InputLine::Unknown(cmd) => println!("* unknown command /{cmd}; try /help"),
    }
    Ok(())
}

fn on_event(store: &StateStore, current: &mut User, event: ClientEvent) {
    match event {
        ClientEvent::Status(status) => {
            if status == Status::Connected {
                touch_session(store, &current.name);
            }
            println!("{}", format_status(status));
        }
        ClientEvent::Roster(roster) => println!("{}", format_roster(&roster)),
        ClientEvent::Chat(chat) => {
            let author = chat.user.map_or_else(|| "?".to_string(), |u| u.name);
            println!("[{author}] {}", chat.message);
        }
        ClientEvent::Pong { rtt } => {
            debug!(rtt_ms = rtt.as_millis(), "pong");
            touch_session(store, &current.name);
        }
        ClientEvent::Error { code, message } => eprintln!("! {code}: {message}"),
        ClientEvent::Reclaimed(user) => {
            println!("* the hub forgot us; rejoined as {}", user.name);
            *current = user;
        }
        ClientEvent::Notice(text) => println!("* {text}"),
    }
}

fn touch_session(store: &StateStore, name: &str) {
    if let Err(e) = store.record_session(name, Utc::now()) {
        warn!("failed to update client state: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::UserId;

    #[test]
    fn parses_input_lines() {
        assert_eq!(InputLine::parse("  hello there "), InputLine::Chat("hello there"));
        assert_eq!(InputLine::parse("/users"), InputLine::Users);
        assert_eq!(InputLine::parse("/reconnect"), InputLine::Reconnect);
        assert_eq!(InputLine::parse("/exit"), InputLine::Exit);
        assert_eq!(InputLine::parse("/quit"), InputLine::Exit);
        assert_eq!(InputLine::parse("/dance"), InputLine::Unknown("dance"));
        assert_eq!(InputLine::parse("   "), InputLine::Empty);
    }

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes(" YES\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn roster_formatting() {
        let roster = vec![
            RosterEntry {
                id: UserId::from("a"),
                name: "alice".into(),
                is_online: true,
            },
            RosterEntry {
                id: UserId::from("b"),
                name: "bob".into(),
                is_online: false,
            },
        ];
        assert_eq!(format_roster(&roster), "* here: alice, bob (away)");
        assert_eq!(format_roster(&[]), "* nobody here");
    }

    #[test]
    fn status_formatting() {
        let text = format_status(Status::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(4000),
        });
        assert_eq!(text, "* connection lost; retry 2 in 4s");
        assert!(format_status(Status::GaveUp { attempts: 10 }).contains("/reconnect"));
    }

    #[test]
    fn reclaim_updates_identity_and_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("client-state.json"));
        let mut current = User::new("carol");
        let fresh = User::new("carol");

        on_event(&store, &mut current, ClientEvent::Reclaimed(fresh.clone()));
        assert_eq!(current.id, fresh.id);

        on_event(&store, &mut current, ClientEvent::Status(Status::Connected));
        assert_eq!(store.load().last_username.as_deref(), Some("carol"));
    }
}
