//! # Dispatch Pipeline
//!
//! Table-driven packet interception. Each direction has one table per
//! [`ConnectionState`], mapping a packet id to an ordered chain of
//! interceptors for one typed packet.
//!
//! ## Semantics
//! - No chain for (state, id): the raw packet passes through untouched
//! - The packet is decoded once; every interceptor sees the output of the
//!   one before it
//! - `Modify` replaces the packet and continues; `Reject` stops the chain
//!   and the packet is never written
//! - An unmodified packet is forwarded as the original raw bytes
//!
//! The pipeline is assembled by [`PipelineBuilder`] at startup and shared
//! read-only by every tunnel.

use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::packets::GamePacket;
use crate::protocol::state::{ConnectionState, Direction};
use crate::service::tunnel::Tunnel;

/// Verdict of a single interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult<P> {
    /// Forward the packet as the interceptor received it
    Pass,
    /// Forward this replacement instead
    Modify(P),
    /// Drop the packet and skip the rest of the chain
    Reject,
}

/// Outcome of running one packet through its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Original bytes, forwarded as read
    Pass(Packet),
    /// Re-encoded replacement
    Modified(Packet),
    Reject,
}

impl Verdict {
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Verdict::Pass(packet) | Verdict::Modified(packet) => Some(packet),
            Verdict::Reject => None,
        }
    }
}

type InterceptorFn<P> =
    dyn Fn(P, Arc<Tunnel>) -> BoxFuture<'static, Result<HandlerResult<P>>> + Send + Sync;

trait Route: Send + Sync {
    fn run<'a>(&'a self, packet: Packet, tunnel: Arc<Tunnel>) -> BoxFuture<'a, Result<Verdict>>;
    fn len(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Chain<P> {
    interceptors: Vec<Arc<InterceptorFn<P>>>,
}

impl<P: GamePacket> Route for Chain<P> {
    fn run<'a>(&'a self, packet: Packet, tunnel: Arc<Tunnel>) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            let mut current = P::from_packet(&packet)?;
            let mut modified = false;

            for interceptor in &self.interceptors {
                match interceptor(current.clone(), Arc::clone(&tunnel)).await? {
                    HandlerResult::Pass => {}
                    HandlerResult::Modify(next) => {
                        current = next;
                        modified = true;
                    }
                    HandlerResult::Reject => return Ok(Verdict::Reject),
                }
            }

            if modified {
                Ok(Verdict::Modified(current.to_packet()))
            } else {
                Ok(Verdict::Pass(packet))
            }
        })
    }

    fn len(&self) -> usize {
        self.interceptors.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Routes for one direction, indexed by state then packet id.
#[derive(Default)]
struct DispatchTable {
    states: [HashMap<i32, Box<dyn Route>>; 4],
}

impl DispatchTable {
    fn route(&self, state: ConnectionState, id: i32) -> Option<&dyn Route> {
        self.states[state.index()].get(&id).map(Box::as_ref)
    }
}

/// Immutable interceptor tables for both directions.
pub struct Pipeline {
    serverbound: DispatchTable,
    clientbound: DispatchTable,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// A pipeline with no interceptors: every packet passes through.
    pub fn empty() -> Self {
        PipelineBuilder::default().build()
    }

    fn table(&self, direction: Direction) -> &DispatchTable {
        match direction {
            Direction::Serverbound => &self.serverbound,
            Direction::Clientbound => &self.clientbound,
        }
    }

    /// Number of interceptors attached to (direction, state, id).
    pub fn chain_len(&self, direction: Direction, state: ConnectionState, id: i32) -> usize {
        self.table(direction)
            .route(state, id)
            .map_or(0, |route| route.len())
    }

    /// Run `packet` through the chain registered for it.
    ///
    /// # Errors
    /// Propagates typed decode failures and interceptor errors; the caller
    /// abandons the packet.
    pub async fn dispatch(
        &self,
        direction: Direction,
        state: ConnectionState,
        packet: Packet,
        tunnel: &Arc<Tunnel>,
    ) -> Result<Verdict> {
        match self.table(direction).route(state, packet.id) {
            None => Ok(Verdict::Pass(packet)),
            Some(route) => route.run(packet, Arc::clone(tunnel)).await,
        }
    }
}

/// Collects interceptors in registration order.
#[derive(Default)]
pub struct PipelineBuilder {
    serverbound: DispatchTable,
    clientbound: DispatchTable,
}

impl PipelineBuilder {
    /// Append `handler` to the chain for `P`'s (direction, state, id).
    ///
    /// # Errors
    /// `ProtocolError::ConfigError` if a different packet type already owns
    /// that slot.
    pub fn intercept<P, F, Fut>(&mut self, handler: F) -> Result<&mut Self>
    where
        P: GamePacket,
        F: Fn(P, Arc<Tunnel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerResult<P>>> + Send + 'static,
    {
        let table = match P::DIRECTION {
            Direction::Serverbound => &mut self.serverbound,
            Direction::Clientbound => &mut self.clientbound,
        };
        let route = table.states[P::STATE.index()]
            .entry(P::ID)
            .or_insert_with(|| {
                Box::new(Chain::<P> {
                    interceptors: Vec::new(),
                }) as Box<dyn Route>
            });

        let chain = route
            .as_any_mut()
            .downcast_mut::<Chain<P>>()
            .ok_or_else(|| {
                ProtocolError::ConfigError(format!(
                    "packet 0x{:02x} ({} {}) already routed to another type",
                    P::ID,
                    P::DIRECTION,
                    P::STATE
                ))
            })?;

        let interceptor: Arc<InterceptorFn<P>> = Arc::new(
            move |packet: P, tunnel: Arc<Tunnel>| -> BoxFuture<'static, Result<HandlerResult<P>>> {
                Box::pin(handler(packet, tunnel))
            },
        );
        chain.interceptors.push(interceptor);
        Ok(self)
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            serverbound: self.serverbound,
            clientbound: self.clientbound,
        }
    }
}
