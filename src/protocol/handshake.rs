//! Handshake and login interception.
//!
//! The proxy never learns the shared secret from the client; the helper
//! recovers candidates for it, and the proxy keeps the one that decrypts
//! the server's first encrypted login frame into a well-formed packet.
//! Once found, the same secret keys all four cipher directions.
//!
//! ```text
//!  server -> EncryptionRequest   record token, relay, ask helper, wait (S2C)
//!  client -> EncryptionResponse  wait for candidates (C2S), relay in
//!                                plaintext, hand candidates to S2C, wait
//!  server -> first frame         trial-decrypted with every candidate (S2C);
//!                                the winner encrypts both legs, the client
//!                                gets its SetCompression, C2S is released
//!  server -> SetCompression      applied to the server leg, not relayed
//!  server -> LoginSuccess        enter Play, register modules
//! ```
//!
//! Each handler is a pipeline interceptor; returning `Reject` for a packet
//! the handler already wrote itself keeps the pump from relaying it twice.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::codec::KeyTrial;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::modules;
use crate::protocol::auxiliary::{ClientboundMessage, EncryptionDataRequest};
use crate::protocol::dispatcher::HandlerResult;
use crate::protocol::packets::{
    EncryptionRequest, EncryptionResponse, GamePacket, Handshake, LoginDisconnect, LoginStart,
    LoginSuccess, SetCompression,
};
use crate::protocol::state::ConnectionState;
use crate::service::pair::PairId;
use crate::service::tunnel::Tunnel;
use crate::utils::crypto::{select_candidate, SharedSecret};

/// Enter Status or Login and point the handshake at the upstream server.
///
/// # Errors
/// `MalformedPacket` for any other next state; the state stays unchanged.
#[instrument(skip_all, fields(tunnel = tunnel.id()))]
pub async fn handle_handshake(
    mut packet: Handshake,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<Handshake>> {
    let next = match ConnectionState::from_next_state(packet.next_state) {
        Some(next @ (ConnectionState::Status | ConnectionState::Login)) => next,
        _ => {
            return Err(ProtocolError::MalformedPacket(format!(
                "{}: {}",
                constants::ERR_UNEXPECTED_NEXT_STATE,
                packet.next_state
            )))
        }
    };
    tunnel.advance_state(next);

    let (host, port) = tunnel.upstream();
    debug!(
        from = %packet.server_address,
        to = %host,
        port,
        next = %next,
        "Handshake rewritten"
    );
    packet.server_address = host;
    packet.server_port = port;
    Ok(HandlerResult::Modify(packet))
}

/// Bind the login to the helper session registered for the same player.
#[instrument(skip_all, fields(tunnel = tunnel.id(), username = %packet.name))]
pub async fn handle_login_start(
    packet: LoginStart,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<LoginStart>> {
    tunnel.set_username(&packet.name);
    let id = PairId::new(packet.name.as_str(), tunnel.client().peer().ip().to_string());

    let Some(pair) = tunnel.context().directory.lookup(&id) else {
        let e = ProtocolError::UnknownPair {
            identity: packet.name.clone(),
            address: tunnel.client().peer().ip().to_string(),
        };
        warn!(error = %e, "No auxiliary session for login");
        tunnel.disconnect(constants::REASON_NO_AUXILIARY_SESSION);
        return Ok(HandlerResult::Reject);
    };
    if let Err(e) = pair.bind(&tunnel) {
        warn!(error = %e, "Auxiliary session already bound");
        tunnel.disconnect(constants::REASON_SESSION_IN_USE);
        return Ok(HandlerResult::Reject);
    }
    tunnel.bind_pair(pair);

    info!("Login bound to auxiliary session");
    Ok(HandlerResult::Pass)
}

/// First packets a server may send once it has enabled encryption.
const LOGIN_REPLY_IDS: &[i32] = &[LoginDisconnect::ID, LoginSuccess::ID, SetCompression::ID];

fn is_login_reply(packet: &Packet) -> bool {
    match packet.id {
        SetCompression::ID => SetCompression::from_packet(packet).is_ok(),
        LoginSuccess::ID => LoginSuccess::from_packet(packet).is_ok(),
        LoginDisconnect::ID => LoginDisconnect::from_packet(packet).is_ok(),
        _ => false,
    }
}

/// Disconnect with `reason`, counting the failure only if this call was
/// the one that closed the tunnel.
fn fail_handshake(tunnel: &Arc<Tunnel>, reason: &str) {
    if tunnel.disconnect(reason) {
        tunnel.metrics().handshake_failed();
    }
}

/// Relay the server's key to the client and ask the helper for secret
/// candidates, then find the one the server encrypts its next frame with.
///
/// Runs on the server -> client pump, which stays parked here until the
/// secret is known, so nothing encrypted is relayed under the wrong key.
#[instrument(skip_all, fields(tunnel = tunnel.id()))]
pub async fn handle_encryption_request(
    packet: EncryptionRequest,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<EncryptionRequest>> {
    tunnel.metrics().handshake_attempt();
    tunnel.record_verify_token(packet.verify_token.clone());
    tunnel.client().write(packet.to_packet()).await?;

    let request = ClientboundMessage::EncryptionDataRequest(EncryptionDataRequest {
        public_key: packet.public_key.to_vec(),
        server_id: packet.server_id.clone(),
    });
    let sent = match tunnel.pair() {
        Some(pair) => pair.auxiliary().send(request),
        None => Err(ProtocolError::HandshakeError(
            constants::ERR_PAIR_NOT_BOUND.to_string(),
        )),
    };
    if let Err(e) = sent {
        warn!(error = %e, "Could not reach helper");
        fail_handshake(&tunnel, constants::REASON_AUXILIARY_LOST);
        return Ok(HandlerResult::Reject);
    }
    debug!("Secret candidates requested");

    let candidates = match tunnel.await_key_trial().await {
        Ok(candidates) => candidates,
        Err(ProtocolError::ConnectionClosed) => return Ok(HandlerResult::Reject),
        Err(e) => {
            warn!(error = %e, "Encryption handshake did not complete");
            fail_handshake(&tunnel, constants::REASON_HANDSHAKE_TIMEOUT);
            return Ok(HandlerResult::Reject);
        }
    };

    let trial = KeyTrial {
        candidates,
        first_ids: LOGIN_REPLY_IDS,
        accept: is_login_reply,
    };
    let secret = match tunnel.negotiate_server_secret(trial).await {
        Ok(secret) => secret,
        Err(_) if tunnel.is_closed() => return Ok(HandlerResult::Reject),
        Err(ProtocolError::Timeout) => {
            warn!("Server sent no encrypted reply in time");
            fail_handshake(&tunnel, constants::REASON_HANDSHAKE_TIMEOUT);
            return Ok(HandlerResult::Reject);
        }
        Err(e) => {
            warn!(error = %e, "No candidate decrypts the server's reply");
            fail_handshake(&tunnel, constants::REASON_DECRYPTION_FAILURE);
            return Ok(HandlerResult::Reject);
        }
    };
    debug!("Server leg decrypting");

    tunnel.server().enable_encryption(&secret).await?;
    tunnel.client().enable_encryption(&secret).await?;

    let threshold = tunnel.config().transport.client_compression_threshold;
    let client_threshold = tunnel.config().transport.client_threshold();
    tunnel
        .client()
        .write_then(SetCompression { threshold }.to_packet(), |codec| {
            codec.set_threshold(client_threshold);
            Ok(())
        })
        .await?;

    tunnel.release_selected_secret(secret)?;
    Ok(HandlerResult::Reject)
}

/// Relay the client's response in plaintext and hand the helper's
/// candidates to the server -> client pump for trial decryption.
///
/// When the helper also sent the verify token sealed under the real
/// secret, the candidates are narrowed to the one that unseals it before
/// anything reaches the server.
#[instrument(skip_all, fields(tunnel = tunnel.id()))]
pub async fn handle_encryption_response(
    packet: EncryptionResponse,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<EncryptionResponse>> {
    let data = match tunnel.await_candidates().await {
        Ok(data) => data,
        Err(ProtocolError::ConnectionClosed) => return Ok(HandlerResult::Reject),
        Err(e) => {
            warn!(error = %e, "Helper sent no secret candidates");
            fail_handshake(&tunnel, constants::REASON_HANDSHAKE_TIMEOUT);
            return Ok(HandlerResult::Reject);
        }
    };

    let candidates = match data.sealed_token.as_deref() {
        Some(sealed) => match tunnel.verify_token() {
            Some(verify_token) => select_candidate(&data.candidates, sealed, &verify_token)
                .into_iter()
                .collect::<Vec<_>>(),
            None => {
                warn!("{}", constants::ERR_NO_VERIFY_TOKEN);
                Vec::new()
            }
        },
        None => data
            .candidates
            .iter()
            .filter_map(|candidate| SharedSecret::from_slice(candidate).ok())
            .collect(),
    };
    if candidates.is_empty() {
        warn!(
            offered = data.candidates.len(),
            "No usable secret candidate"
        );
        fail_handshake(&tunnel, constants::REASON_DECRYPTION_FAILURE);
        return Ok(HandlerResult::Reject);
    }

    tunnel.server().write(packet.to_packet()).await?;
    tunnel.release_key_trial(candidates)?;

    let secret = match tunnel.await_selected_secret().await {
        Ok(secret) => secret,
        Err(ProtocolError::ConnectionClosed) => return Ok(HandlerResult::Reject),
        Err(e) => {
            warn!(error = %e, "Secret never selected");
            fail_handshake(&tunnel, constants::REASON_HANDSHAKE_TIMEOUT);
            return Ok(HandlerResult::Reject);
        }
    };
    tunnel.client().enable_decryption(&secret).await?;
    tunnel
        .client()
        .set_read_threshold(tunnel.config().transport.client_threshold())
        .await;

    tunnel.metrics().handshake_success();
    info!("Both legs encrypted");
    Ok(HandlerResult::Reject)
}

/// Apply the server's compression threshold to the server leg only.
#[instrument(skip_all, fields(tunnel = tunnel.id(), threshold = packet.threshold))]
pub async fn handle_set_compression(
    packet: SetCompression,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<SetCompression>> {
    let threshold = usize::try_from(packet.threshold).ok();
    tunnel.server().set_compression(threshold).await;
    debug!("Server leg compression updated");
    Ok(HandlerResult::Reject)
}

#[instrument(skip_all, fields(tunnel = tunnel.id(), username = %packet.username))]
pub async fn handle_login_success(
    packet: LoginSuccess,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<LoginSuccess>> {
    tunnel.advance_state(ConnectionState::Play);
    info!(uuid = %packet.uuid, "Login complete");

    if let Err(e) = modules::register_defaults(&tunnel) {
        warn!(error = %e, "Module registration failed");
    }
    Ok(HandlerResult::Pass)
}

pub async fn handle_login_disconnect(
    packet: LoginDisconnect,
    tunnel: Arc<Tunnel>,
) -> Result<HandlerResult<LoginDisconnect>> {
    info!(tunnel = tunnel.id(), reason = %packet.reason, "Server refused login");
    Ok(HandlerResult::Pass)
}
