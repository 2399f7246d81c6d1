//! Shared harness: in-memory client, server, and helper endpoints around a
//! real tunnel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};

use intercept_tunnel::config::ProxyConfig;
use intercept_tunnel::core::codec::FrameCodec;
use intercept_tunnel::core::packet::Packet;
use intercept_tunnel::protocol::auxiliary::{
    ClientboundMessage, EncryptionData, HandshakePayload, ServerboundMessage,
};
use intercept_tunnel::protocol::packets::{
    EncryptionRequest, EncryptionResponse, GamePacket, Handshake, LoginStart, LoginSuccess,
    SetCompression,
};
use intercept_tunnel::service::auxiliary::AuxiliaryChannel;
use intercept_tunnel::service::context::ProxyContext;
use intercept_tunnel::service::pair::PairId;
use intercept_tunnel::service::tunnel::Tunnel;
use intercept_tunnel::utils::crypto::SharedSecret;

pub const WAIT: Duration = Duration::from_secs(3);
pub const PLAYER: &str = "Steve";
pub const VERIFY_TOKEN: [u8; 4] = [9, 8, 7, 6];

pub fn addr(value: &str) -> SocketAddr {
    value.parse().unwrap()
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig::default_with_overrides(|config| {
        config.auxiliary.handshake_timeout = Duration::from_secs(2);
        config.auxiliary.keepalive_interval = Duration::from_secs(30);
        config.server.shutdown_timeout = Duration::from_secs(1);
        config.transport.client_compression_threshold = 256;
        config.licenses.development_mode = true;
    })
}

pub fn context(config: ProxyConfig) -> Arc<ProxyContext> {
    Arc::new(ProxyContext::new(config).unwrap())
}

pub fn secret(byte: u8) -> SharedSecret {
    SharedSecret::from_slice(&[byte; 16]).unwrap()
}

pub fn random_secret() -> SharedSecret {
    SharedSecret::from_slice(&rand::random::<[u8; 16]>()).unwrap()
}

/// Poll `condition` until it holds or the harness deadline passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}

pub struct Helper {
    pub channel: Arc<AuxiliaryChannel>,
    pub lines: Framed<DuplexStream, LinesCodec>,
}

impl Helper {
    /// Spawn an auxiliary channel without handshaking.
    pub fn attach(context: &Arc<ProxyContext>) -> Self {
        let (proxy_side, helper_side) = tokio::io::duplex(64 * 1024);
        let channel = AuxiliaryChannel::spawn(
            Arc::clone(context),
            proxy_side,
            addr("127.0.0.1:40000"),
        );
        Self {
            channel,
            lines: Framed::new(helper_side, LinesCodec::new()),
        }
    }

    /// Spawn a channel and complete the handshake for `identity`.
    pub async fn connect(context: &Arc<ProxyContext>, identity: &str) -> Self {
        let mut helper = Self::attach(context);
        helper
            .send(ServerboundMessage::Handshake(HandshakePayload {
                identity: identity.to_string(),
                auth_key: "test-key".to_string(),
            }))
            .await;
        let id = PairId::new(identity, "127.0.0.1");
        let directory = Arc::clone(&context.directory);
        wait_until(|| directory.lookup(&id).is_some()).await;
        helper
    }

    pub async fn send(&mut self, message: ServerboundMessage) {
        self.lines.send(message.to_line().unwrap()).await.unwrap();
    }

    /// Next message other than a keep-alive request.
    pub async fn recv(&mut self) -> ClientboundMessage {
        loop {
            let line = within(self.lines.next()).await.unwrap().unwrap();
            let message = ClientboundMessage::from_line(&line).unwrap();
            if message != ClientboundMessage::KeepAliveRequest {
                return message;
            }
        }
    }
}

pub struct Endpoints {
    pub tunnel: Arc<Tunnel>,
    pub client: Framed<DuplexStream, FrameCodec>,
    pub server: Framed<DuplexStream, FrameCodec>,
}

/// A running tunnel with test-owned client and server ends.
pub fn open_tunnel(context: &Arc<ProxyContext>) -> Endpoints {
    let (proxy_client, client) = tokio::io::duplex(256 * 1024);
    let (proxy_server, server) = tokio::io::duplex(256 * 1024);
    let tunnel = Tunnel::new(
        Arc::clone(context),
        proxy_client,
        addr("127.0.0.1:50000"),
        proxy_server,
        addr("127.0.0.1:25566"),
    );
    tokio::spawn(Arc::clone(&tunnel).run());
    Endpoints {
        tunnel,
        client: Framed::new(client, FrameCodec::default()),
        server: Framed::new(server, FrameCodec::default()),
    }
}

pub async fn send<P: GamePacket>(framed: &mut Framed<DuplexStream, FrameCodec>, packet: &P) {
    framed.send(packet.to_packet()).await.unwrap();
}

pub async fn recv_raw(framed: &mut Framed<DuplexStream, FrameCodec>) -> Option<Packet> {
    within(framed.next()).await.map(|frame| frame.unwrap())
}

pub async fn recv<P: GamePacket>(framed: &mut Framed<DuplexStream, FrameCodec>) -> P {
    let packet = recv_raw(framed).await.expect("stream ended");
    P::from_packet(&packet).unwrap()
}

/// Handshake and LoginStart, through to the server.
pub async fn start_login(endpoints: &mut Endpoints) {
    send(
        &mut endpoints.client,
        &Handshake {
            protocol_version: 47,
            server_address: "play.example.net".to_string(),
            server_port: 25565,
            next_state: 2,
        },
    )
    .await;
    let _: Handshake = recv(&mut endpoints.server).await;

    send(
        &mut endpoints.client,
        &LoginStart {
            name: PLAYER.to_string(),
        },
    )
    .await;
    let _: LoginStart = recv(&mut endpoints.server).await;
}

/// Full online-mode login with `secret` as the real shared secret.
pub async fn complete_login(endpoints: &mut Endpoints, helper: &mut Helper, key: &SharedSecret) {
    start_login(endpoints).await;

    send(
        &mut endpoints.server,
        &EncryptionRequest {
            server_id: String::new(),
            public_key: vec![1, 2, 3].into(),
            verify_token: VERIFY_TOKEN.to_vec().into(),
        },
    )
    .await;
    let _: EncryptionRequest = recv(&mut endpoints.client).await;
    assert!(matches!(
        helper.recv().await,
        ClientboundMessage::EncryptionDataRequest(_)
    ));

    // The real verify token field is RSA output, opaque to the proxy.
    send(
        &mut endpoints.client,
        &EncryptionResponse {
            shared_secret: vec![0xaa; 128].into(),
            verify_token: vec![0xbb; 128].into(),
        },
    )
    .await;
    endpoints.client.codec_mut().enable_encryption(key).unwrap();
    endpoints.client.codec_mut().enable_decryption(key).unwrap();

    helper
        .send(ServerboundMessage::EncryptionDataResponse(EncryptionData {
            candidates: vec![vec![0x55; 16], key.as_bytes().to_vec()],
            sealed_token: None,
        }))
        .await;

    let _: EncryptionResponse = recv(&mut endpoints.server).await;
    endpoints.server.codec_mut().enable_encryption(key).unwrap();
    endpoints.server.codec_mut().enable_decryption(key).unwrap();

    send(&mut endpoints.server, &SetCompression { threshold: 128 }).await;
    endpoints.server.codec_mut().set_threshold(Some(128));

    let compression: SetCompression = recv(&mut endpoints.client).await;
    endpoints
        .client
        .codec_mut()
        .set_threshold(usize::try_from(compression.threshold).ok());

    send(
        &mut endpoints.server,
        &LoginSuccess {
            uuid: "069a79f4-44e9-4726-a5be-fca90e38aaf5".to_string(),
            username: PLAYER.to_string(),
        },
    )
    .await;
    let _: LoginSuccess = recv(&mut endpoints.client).await;
}
