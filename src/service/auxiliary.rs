//! # Auxiliary Channel
//!
//! The helper's control connection. One JSON message per line in each
//! direction, see [`crate::protocol::auxiliary`].
//!
//! ## Tasks
//! - **reader**: parses helper messages and applies them
//! - **writer**: drains the outbound queue onto the socket
//! - **keep-alive**: pings the helper every interval and closes the session
//!   once the helper has been silent for more than two intervals
//!
//! The first message must be a handshake, which creates the
//! [`TunnelPair`] the game login will later bind to. A protocol violation
//! closes the channel and, through its pair, the bound tunnel.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::auxiliary::{ClientboundMessage, HandshakePayload, ServerboundMessage};
use crate::service::context::ProxyContext;
use crate::service::pair::{PairId, TunnelPair};
use crate::service::tunnel::Tunnel;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Longest line accepted from the helper.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

pub struct AuxiliaryChannel {
    id: u64,
    peer: SocketAddr,
    context: Arc<ProxyContext>,
    outbound: mpsc::UnboundedSender<ClientboundMessage>,
    pair: Mutex<Weak<TunnelPair>>,
    handshaken: AtomicBool,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl AuxiliaryChannel {
    /// Take over `stream` and start the channel's tasks.
    pub fn spawn<S>(context: Arc<ProxyContext>, stream: S, peer: SocketAddr) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        context.metrics.auxiliary_opened();

        let channel = Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            context,
            outbound,
            pair: Mutex::new(Weak::new()),
            handshaken: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        info!(channel = channel.id, peer = %peer, "Auxiliary session open");

        let lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let sink = FramedWrite::new(write_half, LinesCodec::new());
        tokio::spawn(Arc::clone(&channel).write_loop(sink, queue));
        tokio::spawn(Arc::clone(&channel).read_loop(lines));
        tokio::spawn(Arc::clone(&channel).keepalive_loop());
        channel
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The pair created by this channel's handshake, while registered.
    pub fn pair(&self) -> Option<Arc<TunnelPair>> {
        self.pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    fn tunnel(&self) -> Option<Arc<Tunnel>> {
        self.pair().and_then(|pair| pair.tunnel())
    }

    /// Queue a message for the helper.
    ///
    /// # Errors
    /// `ProtocolError::ConnectionClosed` once the channel is closed.
    pub fn send(&self, message: ClientboundMessage) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Close the channel and its pair. Idempotent.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!(channel = self.id, peer = %self.peer, "Closing auxiliary session");
        self.shutdown.cancel();
        self.context.metrics.auxiliary_closed();
        if let Some(pair) = self.pair() {
            self.context.directory.unregister(&pair);
        }
    }

    async fn write_loop<S>(
        self: Arc<Self>,
        mut sink: FramedWrite<WriteHalf<S>, LinesCodec>,
        mut queue: mpsc::UnboundedReceiver<ClientboundMessage>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let line = match message.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(channel = self.id, error = %e, "Could not encode message");
                    continue;
                }
            };
            if let Err(e) = sink.send(line).await {
                debug!(channel = self.id, error = %e, "Auxiliary write failed");
                break;
            }
        }
        if let Err(e) = SinkExt::<String>::close(&mut sink).await {
            debug!(channel = self.id, error = %e, "Auxiliary shutdown failed");
        }
        self.close();
    }

    async fn read_loop<S>(self: Arc<Self>, mut lines: FramedRead<ReadHalf<S>, LinesCodec>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                line = lines.next() => line,
            };
            match line {
                Some(Ok(line)) => {
                    if let Err(e) = self.handle_line(&line).await {
                        warn!(channel = self.id, error = %e, "Auxiliary protocol violation");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(channel = self.id, error = %e, "Auxiliary read failed");
                    break;
                }
                None => {
                    debug!(channel = self.id, "Helper disconnected");
                    break;
                }
            }
        }
        self.close();
    }

    #[instrument(skip(self, line), fields(channel = self.id))]
    async fn handle_line(self: &Arc<Self>, line: &str) -> Result<()> {
        let message = ServerboundMessage::from_line(line)?;
        debug!(op = message.op(), "Auxiliary message");

        if let ServerboundMessage::Handshake(payload) = message {
            return self.handle_handshake(payload);
        }
        if !self.handshaken.load(Ordering::Acquire) {
            return Err(ProtocolError::AuxiliaryError(
                constants::ERR_HANDSHAKE_REQUIRED.to_string(),
            ));
        }

        match message {
            ServerboundMessage::KeepAliveResponse => {
                *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
                Ok(())
            }
            ServerboundMessage::EncryptionDataResponse(data) => {
                let tunnel = self.tunnel().ok_or_else(|| {
                    ProtocolError::AuxiliaryError(constants::ERR_PAIR_NOT_BOUND.to_string())
                })?;
                debug!(candidates = data.candidates.len(), "Secret candidates received");
                tunnel.offer_candidates(data)
            }
            ServerboundMessage::ModuleToggleAck(ack) => {
                let tunnel = self.tunnel().ok_or_else(|| {
                    ProtocolError::AuxiliaryError(constants::ERR_PAIR_NOT_BOUND.to_string())
                })?;
                tunnel.acknowledge_toggle(&ack.identifier, ack.status).await
            }
            ServerboundMessage::Handshake(_) => Ok(()),
        }
    }

    fn handle_handshake(self: &Arc<Self>, payload: HandshakePayload) -> Result<()> {
        if self
            .handshaken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProtocolError::AuxiliaryError(
                constants::ERR_DUPLICATE_HANDSHAKE.to_string(),
            ));
        }

        let license = self.context.licenses.resolve(&payload.auth_key)?;
        let id = PairId::new(payload.identity, self.peer.ip().to_string());
        let pair = TunnelPair::new(id, Arc::clone(self), license);
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(&pair);

        info!(pair = %pair.id(), "Auxiliary handshake accepted");
        self.context.directory.register(pair);
        Ok(())
    }

    async fn keepalive_loop(self: Arc<Self>) {
        let period = self.context.config.auxiliary.keepalive_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let silent = self
                .last_seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed();
            if silent > period * 2 {
                warn!(
                    channel = self.id,
                    silent_ms = silent.as_millis() as u64,
                    "Helper stopped answering keep-alives"
                );
                self.context.metrics.keepalive_timeout();
                if let Some(tunnel) = self.tunnel() {
                    tunnel.disconnect(constants::REASON_AUXILIARY_LOST);
                }
                self.close();
                break;
            }

            if self.send(ClientboundMessage::KeepAliveRequest).is_err() {
                break;
            }
        }
    }
}
