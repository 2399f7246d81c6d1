//! # Tunnel
//!
//! One proxied player session: a client leg, a server leg, and two pumps
//! moving packets between them through the shared [`Pipeline`].
//!
//! ## Components
//! - **Leg**: a framed stream split into a locked reader and a locked
//!   writer, each with its own [`FrameCodec`]
//! - **Pumps**: `client -> server` and `server -> client` workers that read
//!   a frame, dispatch it, and write the verdict
//! - **Handoff slots**: the single-use rendezvous points of the
//!   encryption handshake
//! - **Module registry**: per-tunnel feature modules and their workers
//!
//! ## Lifecycle
//! The connection state only moves forward. `close` is idempotent: the
//! first call cancels both pumps, stops every module, releases the pair,
//! and shuts both sockets down once; later calls do nothing.
//!
//! [`Pipeline`]: crate::protocol::dispatcher::Pipeline

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ProxyConfig;
use crate::core::codec::{FrameCodec, KeyTrial};
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::license::Feature;
use crate::modules::{ModuleHandle, ModuleRegistry};
use crate::protocol::auxiliary::{ClientboundMessage, EncryptionData, ModuleToggle};
use crate::protocol::dispatcher::Verdict;
use crate::protocol::packets::{
    text_component, GamePacket, LoginDisconnect, PlayDisconnect, ServerChatMessage,
};
use crate::protocol::state::{ConnectionState, Direction};
use crate::service::context::ProxyContext;
use crate::service::handoff::HandoffSlot;
use crate::service::pair::TunnelPair;
use crate::service::world::{Entity, EntityTracker, PlayerState};
use crate::utils::crypto::SharedSecret;
use crate::utils::Metrics;

static NEXT_TUNNEL_ID: AtomicU64 = AtomicU64::new(1);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One side of a tunnel.
///
/// Codec changes go through the same lock as the reads or writes they
/// affect, so a threshold or cipher swap always lands between frames.
pub struct Leg {
    peer: SocketAddr,
    reader: Mutex<Option<FramedRead<BoxedReader, FrameCodec>>>,
    writer: Mutex<Option<FramedWrite<BoxedWriter, FrameCodec>>>,
    /// A frame read ahead by a key trial, returned by the next `read`.
    held: StdMutex<Option<Packet>>,
}

impl Leg {
    pub fn new<S>(stream: S, peer: SocketAddr, max_frame: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);
        Self {
            peer,
            reader: Mutex::new(Some(FramedRead::new(reader, FrameCodec::new(max_frame)))),
            writer: Mutex::new(Some(FramedWrite::new(writer, FrameCodec::new(max_frame)))),
            held: StdMutex::new(None),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next frame, `None` at end of stream.
    async fn read(&self, cancel: &CancellationToken) -> Result<Option<Packet>> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        if let Some(packet) = self.held.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Ok(Some(packet));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            frame = reader.next() => frame.transpose(),
        }
    }

    /// Find the candidate the peer encrypts with by reading ahead one frame
    /// under a key trial. The frame is kept for the next `read`, and the
    /// winning secret is installed on the reader.
    ///
    /// # Errors
    /// `DecryptionFailure` when no candidate fits, `Timeout` after
    /// `timeout`, `ConnectionClosed` on cancellation or end of stream.
    pub async fn negotiate_decryption(
        &self,
        trial: KeyTrial,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SharedSecret> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        reader.decoder_mut().begin_key_trial(trial)?;

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProtocolError::ConnectionClosed),
            frame = tokio::time::timeout(timeout, reader.next()) => {
                frame.map_err(|_| ProtocolError::Timeout)?
            }
        };
        let packet = frame.transpose()?.ok_or(ProtocolError::ConnectionClosed)?;
        let secret = reader
            .decoder_mut()
            .take_selected()
            .ok_or(ProtocolError::DecryptionFailure)?;
        *self.held.lock().unwrap_or_else(PoisonError::into_inner) = Some(packet);
        Ok(secret)
    }

    pub async fn write(&self, packet: Packet) -> Result<()> {
        self.write_then(packet, |_| Ok(())).await
    }

    /// Write `packet`, then adjust the writer's codec before any other
    /// frame can follow it.
    pub async fn write_then<F>(&self, packet: Packet, after: F) -> Result<()>
    where
        F: FnOnce(&mut FrameCodec) -> Result<()>,
    {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        writer.send(packet).await?;
        after(writer.encoder_mut())
    }

    pub async fn enable_encryption(&self, secret: &SharedSecret) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        writer.encoder_mut().enable_encryption(secret)
    }

    pub async fn enable_decryption(&self, secret: &SharedSecret) -> Result<()> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        reader.decoder_mut().enable_decryption(secret)
    }

    /// Set the compression threshold in both directions of this leg.
    pub async fn set_compression(&self, threshold: Option<usize>) {
        self.set_read_threshold(threshold).await;
        if let Some(writer) = self.writer.lock().await.as_mut() {
            writer.encoder_mut().set_threshold(threshold);
        }
    }

    pub async fn set_read_threshold(&self, threshold: Option<usize>) {
        if let Some(reader) = self.reader.lock().await.as_mut() {
            reader.decoder_mut().set_threshold(threshold);
        }
    }

    /// Waits for a read in progress, so a running pump blocks this until
    /// its next frame arrives.
    pub async fn read_threshold(&self) -> Option<usize> {
        self.reader
            .lock()
            .await
            .as_ref()
            .and_then(|reader| reader.decoder().threshold())
    }

    pub async fn write_threshold(&self) -> Option<usize> {
        self.writer
            .lock()
            .await
            .as_ref()
            .and_then(|writer| writer.encoder().threshold())
    }

    pub async fn is_encrypting(&self) -> bool {
        self.writer
            .lock()
            .await
            .as_ref()
            .is_some_and(|writer| writer.encoder().is_encrypting())
    }

    pub async fn is_decrypting(&self) -> bool {
        self.reader
            .lock()
            .await
            .as_ref()
            .is_some_and(|reader| reader.decoder().is_decrypting())
    }

    /// Flush and close the socket. Only the first call does anything.
    async fn shutdown(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(peer = %self.peer, error = %e, "Socket shutdown failed");
            }
        }
        drop(self.reader.lock().await.take());
    }
}

#[derive(Debug, Default)]
struct LoginState {
    username: Option<String>,
    verify_token: Option<Bytes>,
}

pub struct Tunnel {
    id: u64,
    context: Arc<ProxyContext>,
    client: Leg,
    server: Leg,
    state: AtomicU8,
    closed: AtomicBool,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    modules: ModuleRegistry,
    player: StdMutex<PlayerState>,
    entities: StdMutex<EntityTracker>,
    login: StdMutex<LoginState>,
    pair: StdMutex<Option<Arc<TunnelPair>>>,
    /// Filled by the auxiliary channel, taken by the client -> server pump.
    candidates: HandoffSlot<EncryptionData>,
    /// Filled by the client -> server pump once the response is relayed,
    /// taken by the server -> client pump.
    key_trial: HandoffSlot<Vec<SharedSecret>>,
    /// Filled by the server -> client pump, taken by the client -> server pump.
    selected_secret: HandoffSlot<SharedSecret>,
}

impl Tunnel {
    pub fn new<C, S>(
        context: Arc<ProxyContext>,
        client: C,
        client_addr: SocketAddr,
        server: S,
        server_addr: SocketAddr,
    ) -> Arc<Self>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let max_frame = context.config.transport.max_packet_size;
        context.metrics.tunnel_opened();
        Arc::new(Self {
            id: NEXT_TUNNEL_ID.fetch_add(1, Ordering::Relaxed),
            client: Leg::new(client, client_addr, max_frame),
            server: Leg::new(server, server_addr, max_frame),
            context,
            state: AtomicU8::new(ConnectionState::Handshake as u8),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            terminated: CancellationToken::new(),
            modules: ModuleRegistry::new(),
            player: StdMutex::new(PlayerState::default()),
            entities: StdMutex::new(EntityTracker::default()),
            login: StdMutex::new(LoginState::default()),
            pair: StdMutex::new(None),
            candidates: HandoffSlot::new("encryption-candidates"),
            key_trial: HandoffSlot::new("enable-encryption-s2c"),
            selected_secret: HandoffSlot::new("enable-encryption-c2s"),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.context
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.context.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.context.metrics
    }

    pub fn client(&self) -> &Leg {
        &self.client
    }

    pub fn server(&self) -> &Leg {
        &self.server
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Handshake)
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns whether the state changed.
    pub fn advance_state(&self, next: ConnectionState) -> bool {
        let previous = self.state.fetch_max(next as u8, Ordering::AcqRel);
        let changed = previous < next as u8;
        if changed {
            debug!(tunnel = self.id, state = %next, "State advanced");
        }
        changed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has finished shutting both legs down.
    pub async fn closed(&self) {
        self.terminated.cancelled().await;
    }

    pub fn with_player<R>(&self, f: impl FnOnce(&mut PlayerState) -> R) -> R {
        let mut player = self.player.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut player)
    }

    pub fn with_entities<R>(&self, f: impl FnOnce(&mut EntityTracker) -> R) -> R {
        let mut entities = self.entities.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entities)
    }

    /// Closest tracked entity within `max_distance` blocks of the player.
    pub fn nearest_entity(&self, max_distance: f64) -> Option<Entity> {
        let origin = self.with_player(|player| player.location);
        self.with_entities(|entities| entities.nearest(&origin, max_distance))
    }

    pub fn username(&self) -> Option<String> {
        self.login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .username
            .clone()
    }

    pub fn set_username(&self, username: &str) {
        self.login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .username = Some(username.to_string());
    }

    /// Remember the verify token the server issued.
    pub fn record_verify_token(&self, token: Bytes) {
        self.login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .verify_token = Some(token);
    }

    pub fn verify_token(&self) -> Option<Bytes> {
        self.login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .verify_token
            .clone()
    }

    /// Host and port the rewritten handshake should name.
    pub fn upstream(&self) -> (String, u16) {
        self.context
            .config
            .server
            .upstream_host_port()
            .unwrap_or_else(|| (self.server.peer.ip().to_string(), self.server.peer.port()))
    }

    pub fn bind_pair(&self, pair: Arc<TunnelPair>) {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair);
    }

    pub fn pair(&self) -> Option<Arc<TunnelPair>> {
        self.pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the bound pair's license grants `feature`. Unpaired tunnels
    /// are granted nothing.
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.pair()
            .is_some_and(|pair| pair.license().has_feature(feature))
    }

    /// Deliver the helper's secret candidates to the waiting login handler.
    ///
    /// # Errors
    /// `HandoffConsumed` if candidates were already delivered.
    pub fn offer_candidates(&self, data: EncryptionData) -> Result<()> {
        self.candidates.fill(data)
    }

    pub async fn await_candidates(&self) -> Result<EncryptionData> {
        let timeout = self.context.config.auxiliary.handshake_timeout;
        self.candidates.take(timeout, &self.shutdown).await
    }

    /// Hand the candidates left after the helper's checks to the
    /// server -> client pump.
    pub fn release_key_trial(&self, candidates: Vec<SharedSecret>) -> Result<()> {
        self.key_trial.fill(candidates)
    }

    pub async fn await_key_trial(&self) -> Result<Vec<SharedSecret>> {
        let timeout = self.context.config.auxiliary.handshake_timeout;
        self.key_trial.take(timeout, &self.shutdown).await
    }

    /// Trial-decrypt the server's next frame with each candidate.
    pub async fn negotiate_server_secret(&self, trial: KeyTrial) -> Result<SharedSecret> {
        let timeout = self.context.config.auxiliary.handshake_timeout;
        self.server
            .negotiate_decryption(trial, timeout, &self.shutdown)
            .await
    }

    pub fn release_selected_secret(&self, secret: SharedSecret) -> Result<()> {
        self.selected_secret.fill(secret)
    }

    /// Waits out both the key trial handoff and the trial itself, so a
    /// stalled handshake is reported by the server -> client side.
    pub async fn await_selected_secret(&self) -> Result<SharedSecret> {
        let timeout = self.context.config.auxiliary.handshake_timeout * 2;
        self.selected_secret.take(timeout, &self.shutdown).await
    }

    pub async fn send_to_client<P: GamePacket>(&self, packet: &P) -> Result<()> {
        self.client.write(packet.to_packet()).await
    }

    pub async fn send_to_server<P: GamePacket>(&self, packet: &P) -> Result<()> {
        self.server.write(packet.to_packet()).await
    }

    /// Show `text` to the player. Outside Play there is no chat to show it in.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        if self.state() != ConnectionState::Play {
            return Ok(());
        }
        self.send_to_client(&ServerChatMessage::system(text)).await
    }

    /// Attach a module to this tunnel, starting its worker if it ticks.
    ///
    /// # Errors
    /// Fails on a duplicate identifier or after close.
    pub fn register_module(self: &Arc<Self>, module: ModuleHandle) -> Result<()> {
        self.modules.register(module, Arc::downgrade(self))
    }

    /// Flip a module on or off.
    ///
    /// Local modules toggle immediately and report the new status. Remote
    /// modules forward the request to the auxiliary session; their status
    /// changes when the acknowledgement arrives.
    #[instrument(skip(self), fields(tunnel = self.id))]
    pub async fn toggle_module(&self, identifier: &str) -> Result<bool> {
        let module = self
            .modules
            .get(identifier)
            .ok_or_else(|| ProtocolError::ModuleError(format!("unknown module '{identifier}'")))?;
        self.context.metrics.module_toggled();

        if module.is_remote() {
            let pair = self.pair().ok_or_else(|| {
                ProtocolError::HandshakeError(constants::ERR_PAIR_NOT_BOUND.to_string())
            })?;
            pair.auxiliary()
                .send(ClientboundMessage::ModuleToggle(ModuleToggle {
                    identifier: identifier.to_string(),
                }))?;
            debug!("Toggle forwarded to auxiliary session");
            return Ok(module.is_enabled());
        }

        let enabled = module.toggle().await?;
        self.announce_module(identifier, enabled).await;
        module.update().await?;
        Ok(enabled)
    }

    /// Change an option on a local module and re-apply its effect.
    ///
    /// Returns the module's description of the new value.
    pub async fn set_module_option(
        &self,
        identifier: &str,
        option: &str,
        value: &str,
    ) -> Result<String> {
        let module = self
            .modules
            .get(identifier)
            .ok_or_else(|| ProtocolError::ModuleError(format!("unknown module '{identifier}'")))?;
        let applied = module.set_option(option, value)?;
        debug!(module = identifier, option, "Module option changed");
        module.update().await?;
        Ok(applied)
    }

    /// Apply a remote module's status as reported by the helper.
    pub async fn acknowledge_toggle(&self, identifier: &str, status: bool) -> Result<()> {
        self.modules.acknowledge(identifier, status)?;
        self.announce_module(identifier, status).await;
        Ok(())
    }

    async fn announce_module(&self, identifier: &str, enabled: bool) {
        let status = if enabled { "enabled" } else { "disabled" };
        if let Err(e) = self.send_chat(&format!("{identifier} {status}")).await {
            debug!(tunnel = self.id, error = %e, "Could not notify player");
        }
    }

    /// Close the tunnel, first telling the client why if the state has a
    /// disconnect packet for it. Only the call that closes the tunnel sends
    /// a notice.
    ///
    /// Returns whether this call closed the tunnel.
    pub fn disconnect(self: &Arc<Self>, reason: &str) -> bool {
        self.shut(Some(reason))
    }

    /// Close the tunnel without a notice. Idempotent.
    ///
    /// Returns whether this call closed the tunnel.
    pub fn close(self: &Arc<Self>) -> bool {
        self.shut(None)
    }

    fn shut(self: &Arc<Self>, notice: Option<&str>) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        match notice {
            Some(reason) => info!(tunnel = self.id, reason, "Disconnecting player"),
            None => info!(tunnel = self.id, "Closing tunnel"),
        }

        self.shutdown.cancel();
        self.modules.close_all();

        let pair = self
            .pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pair) = pair {
            self.context.directory.unregister(&pair);
        }

        let notice = notice.and_then(|reason| self.notice_for(reason));
        let tunnel = Arc::clone(self);
        tokio::spawn(async move {
            let grace = tunnel.context.config.server.shutdown_timeout;
            tunnel.modules.join_workers(grace).await;
            if let Some(packet) = notice {
                match tokio::time::timeout(grace, tunnel.client.write(packet)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(tunnel = tunnel.id, error = %e, "Disconnect notice not delivered")
                    }
                    Err(_) => debug!(tunnel = tunnel.id, "Disconnect notice timed out"),
                }
            }
            for leg in [&tunnel.client, &tunnel.server] {
                if tokio::time::timeout(grace, leg.shutdown()).await.is_err() {
                    warn!(tunnel = tunnel.id, peer = %leg.peer, "Socket shutdown timed out");
                }
            }
            tunnel.context.metrics.tunnel_closed();
            tunnel.terminated.cancel();
            debug!(tunnel = tunnel.id, "Tunnel closed");
        });
        true
    }

    /// The disconnect packet for the current state, if it has one.
    fn notice_for(&self, reason: &str) -> Option<Packet> {
        let reason = text_component(reason);
        match self.state() {
            ConnectionState::Login => Some(LoginDisconnect { reason }.to_packet()),
            ConnectionState::Play => Some(PlayDisconnect { reason }.to_packet()),
            ConnectionState::Handshake | ConnectionState::Status => None,
        }
    }

    /// Run both pumps until either side goes away, then close.
    pub async fn run(self: Arc<Self>) {
        info!(
            tunnel = self.id,
            client = %self.client.peer,
            server = %self.server.peer,
            "Tunnel open"
        );
        let mut serverbound = tokio::spawn(Arc::clone(&self).pump(Direction::Serverbound));
        let mut clientbound = tokio::spawn(Arc::clone(&self).pump(Direction::Clientbound));

        // A pump that panicked never closed the tunnel, so close before
        // waiting on the other one.
        let ((direction, joined), (other, remaining)) = tokio::select! {
            joined = &mut serverbound => {
                ((Direction::Serverbound, joined), (Direction::Clientbound, clientbound))
            }
            joined = &mut clientbound => {
                ((Direction::Clientbound, joined), (Direction::Serverbound, serverbound))
            }
        };
        self.report_pump(direction, joined);
        self.close();
        self.report_pump(other, remaining.await);
        self.closed().await;
    }

    fn report_pump(&self, direction: Direction, joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            error!(tunnel = self.id, %direction, error = %e, "Pump task failed");
        }
    }

    fn legs(&self, direction: Direction) -> (&Leg, &Leg) {
        match direction {
            Direction::Serverbound => (&self.client, &self.server),
            Direction::Clientbound => (&self.server, &self.client),
        }
    }

    async fn pump(self: Arc<Self>, direction: Direction) {
        let (source, destination) = self.legs(direction);
        // The client is told why unless its own transport is what failed.
        let server_lost = Some(constants::REASON_SERVER_LOST);
        let notice = loop {
            let packet = match source.read(&self.shutdown).await {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    debug!(tunnel = self.id, %direction, "End of stream");
                    break match direction {
                        Direction::Clientbound => server_lost,
                        Direction::Serverbound => None,
                    };
                }
                Err(e) => {
                    if self.is_closed() || e.is_disconnect() {
                        debug!(tunnel = self.id, %direction, error = %e, "Pump stopped");
                    } else {
                        warn!(tunnel = self.id, %direction, error = %e, "Read failed");
                    }
                    break match direction {
                        Direction::Clientbound => server_lost,
                        Direction::Serverbound if e.is_disconnect() => None,
                        Direction::Serverbound => Some(constants::REASON_PROTOCOL_ERROR),
                    };
                }
            };

            let state = self.state();
            let id = packet.id;
            let verdict = match self
                .context
                .pipeline
                .dispatch(direction, state, packet, &self)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    if self.is_closed() {
                        break None;
                    }
                    self.context.metrics.interceptor_error();
                    warn!(
                        tunnel = self.id,
                        %direction,
                        %state,
                        packet_id = id,
                        error = %e,
                        "Interceptor failed, packet dropped"
                    );
                    continue;
                }
            };

            let outgoing = match verdict {
                Verdict::Pass(packet) => packet,
                Verdict::Modified(packet) => {
                    self.context.metrics.packet_modified();
                    packet
                }
                Verdict::Reject => {
                    self.context.metrics.packet_rejected();
                    continue;
                }
            };

            if let Err(e) = destination.write(outgoing).await {
                if !self.is_closed() {
                    warn!(tunnel = self.id, %direction, error = %e, "Write failed");
                }
                break match direction {
                    Direction::Serverbound => server_lost,
                    Direction::Clientbound => None,
                };
            }
            self.context.metrics.packet_relayed();
        };

        match notice {
            Some(reason) => self.disconnect(reason),
            None => self.close(),
        };
    }
}
