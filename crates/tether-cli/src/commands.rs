//! Interactive commands read from stdin.
//!
//! ```text
//! @bob,carol hello        direct message
//! ~bob typing...          transient direct message
//! /watch bob carol        /unwatch bob    /status bob carol
//! /join lobby             /leave lobby    /say lobby hello all
//! /invite lobby bob       /kick lobby bob
//! /quit
//! ```

use tether_client::{Client, ClientError};
use tracing::info;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send {
        to: Vec<String>,
        msg: String,
        transient: bool,
    },
    Watch(Vec<String>),
    Unwatch(Vec<String>),
    Status(Vec<String>),
    Join(String),
    Leave(String),
    Say {
        room: String,
        msg: String,
    },
    Invite {
        room: String,
        peers: Vec<String>,
    },
    Kick {
        room: String,
        peers: Vec<String>,
    },
    Quit,
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn peers(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn require<'a>(value: &'a str, what: &str) -> Result<&'a str, String> {
    if value.is_empty() {
        Err(format!("missing {}", what))
    } else {
        Ok(value)
    }
}

/// Parse one line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns a usage message for unknown commands or missing arguments.
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = line.strip_prefix('@').or_else(|| line.strip_prefix('~')) {
        let (to, msg) = split_word(rest);
        let to = peers(require(to, "recipients")?);
        let msg = require(msg, "message")?.to_string();
        return Ok(Some(Input::Send {
            to,
            msg,
            transient: line.starts_with('~'),
        }));
    }

    let (command, rest) = split_word(line);
    let input = match command {
        "/watch" => Input::Watch(peers(require(rest, "peers")?)),
        "/unwatch" => Input::Unwatch(peers(require(rest, "peers")?)),
        "/status" => Input::Status(peers(require(rest, "peers")?)),
        "/join" => Input::Join(require(rest, "room")?.to_string()),
        "/leave" => Input::Leave(require(rest, "room")?.to_string()),
        "/say" => {
            let (room, msg) = split_word(rest);
            Input::Say {
                room: require(room, "room")?.to_string(),
                msg: require(msg, "message")?.to_string(),
            }
        }
        "/invite" | "/kick" => {
            let (room, list) = split_word(rest);
            let room = require(room, "room")?.to_string();
            let peers = peers(require(list, "peers")?);
            if command == "/invite" {
                Input::Invite { room, peers }
            } else {
                Input::Kick { room, peers }
            }
        }
        "/quit" => Input::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(input))
}

/// Run a command against the session and log its outcome.
///
/// # Errors
///
/// Returns the client's error if the command failed.
pub async fn execute(client: &Client, input: Input) -> Result<(), ClientError> {
    match input {
        Input::Send { to, msg, transient } => {
            client.send(msg, to.iter().cloned(), transient).await?;
            info!(to = ?to, transient, "Message delivered");
        }
        Input::Watch(peers) => {
            let reply = client.watch(peers).await?;
            info!(online = %reply["onlineSessionPeerIds"], "Watching");
        }
        Input::Unwatch(peers) => {
            client.unwatch(peers.iter().cloned()).await?;
            info!(peers = ?peers, "Unwatched");
        }
        Input::Status(peers) => {
            let online = client.get_status(peers).await?;
            info!(online = ?online, "Status");
        }
        Input::Join(room) => {
            client.join_group(&room).await?;
            info!(room = %room, "Joined room");
        }
        Input::Leave(room) => {
            client.leave_group(&room).await?;
            info!(room = %room, "Left room");
        }
        Input::Say { room, msg } => {
            client.send_to_group(msg, &room, false).await?;
            info!(room = %room, "Room message delivered");
        }
        Input::Invite { room, peers } => {
            client.invite_to_group(&room, peers).await?;
            info!(room = %room, "Invited");
        }
        Input::Kick { room, peers } => {
            client.kick_from_group(&room, peers).await?;
            info!(room = %room, "Kicked");
        }
        Input::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direct_messages() {
        assert_eq!(
            parse("@bob,carol hello there").unwrap(),
            Some(Input::Send {
                to: vec!["bob".into(), "carol".into()],
                msg: "hello there".into(),
                transient: false,
            })
        );
        assert_eq!(
            parse("~bob typing").unwrap(),
            Some(Input::Send {
                to: vec!["bob".into()],
                msg: "typing".into(),
                transient: true,
            })
        );
        assert!(parse("@bob").is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("/watch a b,c").unwrap(),
            Some(Input::Watch(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(
            parse("/say lobby hi all").unwrap(),
            Some(Input::Say {
                room: "lobby".into(),
                msg: "hi all".into(),
            })
        );
        assert_eq!(
            parse("/kick lobby bob").unwrap(),
            Some(Input::Kick {
                room: "lobby".into(),
                peers: vec!["bob".into()],
            })
        );
        assert_eq!(parse("/quit").unwrap(), Some(Input::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("/join").unwrap_err(), "missing room");
        assert_eq!(parse("/invite lobby").unwrap_err(), "missing peers");
        assert!(parse("/dance").unwrap_err().contains("unknown command"));
    }
}
