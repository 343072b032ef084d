//! Console input: local `/` commands, everything else is chat.

use archipelago_client::types::ClientStatus;
use archipelago_client::{Session, SessionError};

use crate::render::Renderer;

/// One parsed line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the client.
    Quit,
    /// Print locations not yet checked.
    Missing,
    /// Print checked locations.
    Checked,
    /// Print received items.
    Items,
    /// Report `Ready` to the server.
    Ready,
    /// Request the received items list again.
    Sync,
    /// Print the command list.
    Help,
    /// An unrecognized `/` command.
    Unknown(String),
    /// Chat, including server `!` commands.
    Say(String),
    /// Blank input.
    Empty,
}

/// Whether the input loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

const HELP: &str = "\
/missing  list missing locations
/checked  list checked locations
/items    list received items
/ready    report ready
/sync     resync received items
/quit     leave
Anything else is sent as chat.";

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(name) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };
        match name.split_whitespace().next().unwrap_or_default() {
            "quit" | "exit" => Command::Quit,
            "missing" => Command::Missing,
            "checked" => Command::Checked,
            "items" | "received" => Command::Items,
            "ready" => Command::Ready,
            "sync" => Command::Sync,
            "help" => Command::Help,
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Run the command against `session`, printing any output.
    pub fn execute(self, session: &Session) -> Result<Flow, SessionError> {
        let renderer = Renderer::new(session.room(), session.data_package());
        let game = session.room().own_game().unwrap_or_default();
        match self {
            Command::Quit => return Ok(Flow::Quit),
            Command::Missing => {
                let missing = session.locations().missing_locations();
                println!("{} missing locations:", missing.len());
                for id in missing {
                    println!("  {}", session.data_package().location_name(&game, id));
                }
            }
            Command::Checked => {
                let checked = session.locations().checked_locations();
                println!("{} checked locations:", checked.len());
                for id in checked {
                    println!("  {}", session.data_package().location_name(&game, id));
                }
            }
            Command::Items => {
                let items = session.items().received();
                println!("{} received items:", items.len());
                for item in items {
                    let from = renderer
                        .player(item.player)
                        .unwrap_or_else(|| item.player.to_string());
                    println!(
                        "  {} from {from}",
                        session.data_package().item_name(&game, item.item)
                    );
                }
            }
            Command::Ready => session.update_status(ClientStatus::Ready)?,
            Command::Sync => session.sync()?,
            Command::Help => println!("{HELP}"),
            Command::Unknown(name) => println!("unknown command /{name}, try /help"),
            Command::Say(text) => session.say(text)?,
            Command::Empty => {}
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_commands() {
        assert_eq!(Command::parse("/quit"), Command::Quit);
        assert_eq!(Command::parse("  /missing  "), Command::Missing);
        assert_eq!(Command::parse("/checked"), Command::Checked);
        assert_eq!(Command::parse("/items"), Command::Items);
        assert_eq!(Command::parse("/ready"), Command::Ready);
        assert_eq!(Command::parse("/frobnicate now"), Command::Unknown("frobnicate".into()));
        assert_eq!(Command::parse("/"), Command::Unknown(String::new()));
    }

    #[test]
    fn test_parse_chat() {
        assert_eq!(Command::parse("hello all"), Command::Say("hello all".into()));
        assert_eq!(Command::parse("!hint Sword"), Command::Say("!hint Sword".into()));
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn test_execute_while_disconnected() {
        let session = Session::websocket(Default::default());
        assert_eq!(Command::Missing.execute(&session).unwrap(), Flow::Continue);
        assert_eq!(Command::Quit.execute(&session).unwrap(), Flow::Quit);
        assert!(matches!(
            Command::Say("hi".into()).execute(&session),
            Err(SessionError::NotConnected)
        ));
    }
}
