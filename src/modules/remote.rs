//! Modules that run inside the helper process.
//!
//! The proxy keeps only the status flag. Toggles are forwarded over the
//! auxiliary channel and the flag changes when the helper acknowledges.

use tracing::debug;

use crate::modules::{Module, ModuleState};
use crate::protocol::auxiliary::{ClientboundMessage, ModuleToggle};

pub const ESP: &str = "esp";

#[derive(Debug)]
pub struct RemoteModule {
    identifier: &'static str,
    description: &'static str,
    state: ModuleState,
}

impl RemoteModule {
    pub fn new(identifier: &'static str, description: &'static str) -> Self {
        Self {
            identifier,
            description,
            state: ModuleState::new(),
        }
    }
}

impl Module for RemoteModule {
    fn identifier(&self) -> &str {
        self.identifier
    }

    fn description(&self) -> &str {
        self.description
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }

    fn is_remote(&self) -> bool {
        true
    }

    /// Switch the helper side off when the tunnel goes away.
    fn close(&self) {
        if !self.is_enabled() {
            return;
        }
        let Some(pair) = self.state.tunnel().and_then(|tunnel| tunnel.pair()) else {
            return;
        };
        let toggle = ClientboundMessage::ModuleToggle(ModuleToggle {
            identifier: self.identifier.to_string(),
        });
        match pair.auxiliary().send(toggle) {
            Ok(()) => debug!(module = self.identifier, "Remote module switched off"),
            Err(e) => debug!(module = self.identifier, error = %e, "Remote module left running"),
        }
    }
}
