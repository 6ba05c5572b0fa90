//! Line-oriented terminal view
//!
//! Renders view-state changes to stdout and maps typed commands to engine
//! intents. Logs go to stderr so they do not interleave with the view.

use std::fmt::Write as _;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use uuid::Uuid;

use crate::engine::{EngineHandle, ViewState};
use crate::error::Result;

/// How the console enters a session
#[derive(Debug, Clone)]
pub enum Entry {
    Host(String),
    Join(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Add(String),
    /// 1-based index into the rendered card list
    Delete(usize),
    Draw,
    Reset,
    New(String),
    Sync,
    Acknowledge,
    Share,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "add" if rest.is_empty() => return Err("usage: add <text>".into()),
            "add" => Self::Add(rest.to_string()),
            "del" | "delete" => {
                let n: usize = rest.parse().map_err(|_| "usage: del <n>".to_string())?;
                if n == 0 {
                    return Err("card numbers start at 1".into());
                }
                Self::Delete(n)
            }
            "draw" => Self::Draw,
            "reset" => Self::Reset,
            "new" if rest.is_empty() => return Err("usage: new <name>".into()),
            "new" => Self::New(rest.to_string()),
            "sync" => Self::Sync,
            "ok" => Self::Acknowledge,
            "share" => Self::Share,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{}', try help", other)),
        };
        Ok(Some(command))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
commands:
  add <text>   submit a card
  del <n>      delete card n
  draw         draw a random card (host)
  reset        clear all selections (host)
  new <name>   start a new session with everyone (host)
  sync         send the full state to everyone (host)
  ok           close the draw reveal
  share        print the session id
  quit         leave and exit";

/// Run the console until the user quits or the session ends
pub async fn run(handle: EngineHandle, entry: Entry, join_timeout: Duration) -> Result<()> {
    match entry {
        Entry::Host(name) => {
            let session = handle.create_session(name).await?;
            println!(
                "Hosting \"{}\". Participants join with: darkpot join {}",
                session.name, session.id
            );
        }
        Entry::Join(session_id) => {
            handle.join_session(session_id).await?;
            match wait_joined(&handle, join_timeout).await {
                Some(view) if view.ended.is_none() => {}
                Some(view) => {
                    if let Some(reason) = view.ended {
                        println!("Could not join: {}", reason);
                    }
                    return Ok(());
                }
                None => {
                    println!(
                        "No answer from the host of {} within {} ms, giving up",
                        session_id,
                        join_timeout.as_millis()
                    );
                    handle.leave_session().await?;
                    return Ok(());
                }
            }
        }
    }

    println!("{}", HELP);

    let mut views = handle.subscribe_view();
    let mut last = render(&views.borrow_and_update());
    println!("{}", last);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if execute(&handle, &line).await? == Flow::Quit {
                            break;
                        }
                    }
                    // stdin closed
                    None => {
                        handle.leave_session().await?;
                        break;
                    }
                }
            }

            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if let Some(reason) = &view.ended {
                    println!("Session ended: {}", reason);
                    break;
                }
                let text = render(&view);
                if text != last {
                    println!("{}", text);
                    last = text;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                println!("Leaving session");
                handle.leave_session().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Wait for the join to complete or fail; `None` on timeout
async fn wait_joined(handle: &EngineHandle, limit: Duration) -> Option<ViewState> {
    let mut views = handle.subscribe_view();
    let joined = timeout(
        limit,
        views.wait_for(|v| v.ended.is_some() || (v.in_session() && !v.loading)),
    )
    .await;
    match joined {
        Ok(Ok(view)) => Some(view.clone()),
        _ => None,
    }
}

async fn execute(handle: &EngineHandle, line: &str) -> Result<Flow> {
    let command = match ConsoleCommand::parse(line) {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(Flow::Continue),
        Err(usage) => {
            println!("{}", usage);
            return Ok(Flow::Continue);
        }
    };

    let result = match command {
        ConsoleCommand::Add(text) => handle.submit_card(text).await.map(|_| ()),
        ConsoleCommand::Delete(n) => match handle.view().cards.get(n - 1) {
            Some(card) => handle.delete_card(card.id).await,
            None => {
                println!("There is no card {}", n);
                Ok(())
            }
        },
        ConsoleCommand::Draw => handle.pick_random_card().await.map(|_| ()),
        ConsoleCommand::Reset => handle.reset_session().await,
        ConsoleCommand::New(name) => handle.rotate_session(name).await.map(|session| {
            println!("New session \"{}\": {}", session.name, session.id);
        }),
        ConsoleCommand::Sync => handle.resync().await,
        ConsoleCommand::Acknowledge => handle.acknowledge_draw_ui_closed().await,
        ConsoleCommand::Share => {
            match handle.view().session {
                Some(session) => println!("darkpot join {}", session.id),
                None => println!("Not in a session"),
            }
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => {
            handle.leave_session().await?;
            return Ok(Flow::Quit);
        }
    };

    // Rejected intents are shown, not fatal
    if let Err(e) = result {
        println!("{}", e);
    }
    Ok(Flow::Continue)
}

/// Text form of a view state
pub fn render(view: &ViewState) -> String {
    let Some(session) = &view.session else {
        return if view.loading {
            "Joining...".to_string()
        } else {
            "Not in a session".to_string()
        };
    };

    let mut out = String::new();
    let role = if view.is_host() { "host" } else { "participant" };
    let _ = writeln!(
        out,
        "== {} [{}] you are the {}, {} participant(s)",
        session.name,
        session.status,
        role,
        view.participants.len()
    );

    if view.cards.is_empty() {
        let _ = writeln!(out, "   no cards yet");
    }
    for (i, card) in view.cards.iter().enumerate() {
        let marker = if session.selected_card_id == Some(card.id) {
            '>'
        } else if card.selected {
            'x'
        } else {
            ' '
        };
        let _ = writeln!(out, "{:>3}. [{}] {}", i + 1, marker, card.content);
    }

    if view.show_random_picker {
        if let Some(card) = &view.selected_card {
            let _ = writeln!(out, "*** Drawn: {} *** (ok to close)", card.content);
        }
    }
    if let Some(error) = &view.error {
        let _ = writeln!(out, "! {}", error);
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkpot_core::{Card, LocalUser, Participant, Session, SessionStatus};

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ConsoleCommand::parse("add  Flaky deploys "),
            Ok(Some(ConsoleCommand::Add("Flaky deploys".into())))
        );
        assert_eq!(ConsoleCommand::parse("del 2"), Ok(Some(ConsoleCommand::Delete(2))));
        assert_eq!(ConsoleCommand::parse("DRAW"), Ok(Some(ConsoleCommand::Draw)));
        assert_eq!(
            ConsoleCommand::parse("new Sprint 12"),
            Ok(Some(ConsoleCommand::New("Sprint 12".into())))
        );
        assert_eq!(ConsoleCommand::parse("ok"), Ok(Some(ConsoleCommand::Acknowledge)));
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConsoleCommand::parse("add").is_err());
        assert!(ConsoleCommand::parse("del x").is_err());
        assert!(ConsoleCommand::parse("del 0").is_err());
        assert!(ConsoleCommand::parse("new").is_err());
        assert!(ConsoleCommand::parse("frobnicate").is_err());
    }

    #[test]
    fn test_render_outside_session() {
        assert_eq!(render(&ViewState::default()), "Not in a session");
        let joining = ViewState {
            loading: true,
            ..ViewState::default()
        };
        assert_eq!(render(&joining), "Joining...");
    }

    #[test]
    fn test_render_draw() {
        let host = Uuid::new_v4();
        let mut session = Session::new("Retro".into(), host);
        let mut drawn = Card::new(host, "Flaky deploys".into());
        drawn.selected = true;
        let open = Card::new(host, "Standups".into());
        session.status = SessionStatus::Picking;
        session.selected_card_id = Some(drawn.id);

        let view = ViewState {
            user: Some(LocalUser::host(host, session.id)),
            session: Some(session),
            participants: vec![Participant::host(host)],
            cards: vec![drawn.clone(), open],
            selected_card: Some(drawn),
            show_random_picker: true,
            ..ViewState::default()
        };

        let text = render(&view);
        assert!(text.contains("Retro [picking] you are the host"));
        assert!(text.contains("1. [>] Flaky deploys"));
        assert!(text.contains("2. [ ] Standups"));
        assert!(text.contains("*** Drawn: Flaky deploys ***"));
    }
}
