//! Proxy-side chat commands.
//!
//! ```text
//! /toggle <module>        flip a module on or off
//! /modules                list registered modules and their status
//! /set <option> <value>   change a module option:
//!     flightspeed|fs <n>  flight speed multiplier
//!     msg <text>          spammer message
//!     kb <x> <y> <z>      replacement knockback velocity
//! ```
//!
//! Recognised commands are consumed and never reach the server. Anything
//! else, including unknown slash commands, passes through.

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::modules::{antiknockback, flight, spammer};
use crate::protocol::dispatcher::HandlerResult;
use crate::protocol::packets::ChatMessage;
use crate::service::tunnel::Tunnel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Toggle(Option<&'a str>),
    Modules,
    /// Option alias and the rest of the line, words rejoined by one space.
    Set(Option<(&'a str, String)>),
}

const SET_USAGE: &str = "Usage: /set <flightspeed|fs|msg|kb> <value>";

impl<'a> Command<'a> {
    pub fn parse(message: &'a str) -> Option<Self> {
        let mut words = message.strip_prefix('/')?.split_whitespace();
        match words.next()? {
            "toggle" => Some(Command::Toggle(words.next())),
            "modules" => Some(Command::Modules),
            "set" => {
                let option = words.next();
                let value = words.collect::<Vec<_>>().join(" ");
                Some(Command::Set(option.filter(|_| !value.is_empty()).map(|o| (o, value))))
            }
            _ => None,
        }
    }
}

/// Module and option behind a `/set` alias.
fn option_target(alias: &str) -> Option<(&'static str, &'static str)> {
    match alias.to_ascii_lowercase().as_str() {
        "flightspeed" | "fs" => Some((flight::IDENTIFIER, flight::SPEED)),
        "msg" => Some((spammer::IDENTIFIER, spammer::MESSAGE)),
        "kb" => Some((antiknockback::IDENTIFIER, antiknockback::VELOCITY)),
        _ => None,
    }
}

pub async fn handle_chat(
    packet: ChatMessage,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<ChatMessage>> {
    let Some(command) = Command::parse(&packet.message) else {
        return Ok(HandlerResult::Pass);
    };
    debug!(tunnel = tunnel.id(), ?command, "Proxy command");

    match command {
        Command::Toggle(None) => tunnel.send_chat("Usage: /toggle <module>").await?,
        Command::Toggle(Some(identifier)) => {
            if let Err(e) = tunnel.toggle_module(identifier).await {
                tunnel.send_chat(&format!("Error: {e}")).await?;
            }
        }
        Command::Set(None) => tunnel.send_chat(SET_USAGE).await?,
        Command::Set(Some((alias, value))) => {
            let reply = match option_target(alias) {
                Some((identifier, option)) => {
                    match tunnel.set_module_option(identifier, option, &value).await {
                        Ok(applied) => applied,
                        Err(e) => format!("Error: {e}"),
                    }
                }
                None => format!("Unknown option '{alias}'. {SET_USAGE}"),
            };
            tunnel.send_chat(&reply).await?;
        }
        Command::Modules => {
            let registry = tunnel.modules();
            let listing = registry
                .identifiers()
                .into_iter()
                .map(|identifier| {
                    let marker = if registry.is_enabled(&identifier) { "+" } else { "-" };
                    format!("{marker}{identifier}")
                })
                .collect::<Vec<_>>();
            let text = if listing.is_empty() {
                "No modules available".to_string()
            } else {
                format!("Modules: {}", listing.join(", "))
            };
            tunnel.send_chat(&text).await?;
        }
    }
    Ok(HandlerResult::Reject)
}
