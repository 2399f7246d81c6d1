//! Auxiliary handshakes and the pair directory.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::*;
use intercept_tunnel::license::DevelopmentLicense;
use intercept_tunnel::protocol::auxiliary::{HandshakePayload, ModuleToggleAck, ServerboundMessage};
use intercept_tunnel::service::pair::{PairDirectory, PairId, TunnelPair};
use std::sync::Arc;

fn handshake(identity: &str, auth_key: &str) -> ServerboundMessage {
    ServerboundMessage::Handshake(HandshakePayload {
        identity: identity.to_string(),
        auth_key: auth_key.to_string(),
    })
}

#[tokio::test]
async fn test_handshake_registers_pair() {
    let context = context(test_config());
    let helper = Helper::connect(&context, PLAYER).await;

    let pair = context
        .directory
        .lookup(&PairId::new(PLAYER, "127.0.0.1"))
        .unwrap();
    assert!(Arc::ptr_eq(pair.auxiliary(), &helper.channel));
    assert!(pair.tunnel().is_none());
    assert_eq!(pair.id().to_string(), "Steve@127.0.0.1");
}

#[tokio::test]
async fn test_new_handshake_replaces_and_closes_old_pair() {
    let context = context(test_config());
    let first = Helper::connect(&context, PLAYER).await;
    let id = PairId::new(PLAYER, "127.0.0.1");
    let original = context.directory.lookup(&id).unwrap();

    let mut second = Helper::attach(&context);
    second.send(handshake(PLAYER, "test-key")).await;
    wait_until(|| first.channel.is_closed()).await;

    let current = context.directory.lookup(&id).unwrap();
    assert!(!Arc::ptr_eq(&current, &original));
    assert!(Arc::ptr_eq(current.auxiliary(), &second.channel));
    assert!(!second.channel.is_closed());
    assert_eq!(context.directory.len(), 1);
}

#[tokio::test]
async fn test_stale_unregister_leaves_current_pair() {
    let context = context(test_config());
    let directory = PairDirectory::default();
    let id = PairId::new("Alex", "10.0.0.2");

    let old_helper = Helper::attach(&context);
    let new_helper = Helper::attach(&context);
    let old = TunnelPair::new(
        id.clone(),
        Arc::clone(&old_helper.channel),
        Arc::new(DevelopmentLicense),
    );
    let new = TunnelPair::new(
        id.clone(),
        Arc::clone(&new_helper.channel),
        Arc::new(DevelopmentLicense),
    );

    assert!(directory.register(Arc::clone(&old)).is_none());
    let replaced = directory.register(Arc::clone(&new)).unwrap();
    assert!(Arc::ptr_eq(&replaced, &old));
    assert!(old_helper.channel.is_closed());

    assert!(!directory.unregister(&old));
    assert!(Arc::ptr_eq(&directory.lookup(&id).unwrap(), &new));
    assert!(!new_helper.channel.is_closed());

    assert!(directory.unregister(&new));
    assert!(directory.is_empty());
    assert!(new_helper.channel.is_closed());
}

#[tokio::test]
async fn test_duplicate_handshake_closes_channel() {
    let context = context(test_config());
    let mut helper = Helper::connect(&context, PLAYER).await;

    helper.send(handshake(PLAYER, "test-key")).await;
    wait_until(|| helper.channel.is_closed()).await;
    assert!(context.directory.is_empty());
}

#[tokio::test]
async fn test_message_before_handshake_closes_channel() {
    let context = context(test_config());
    let mut helper = Helper::attach(&context);

    helper
        .send(ServerboundMessage::ModuleToggleAck(ModuleToggleAck {
            identifier: "esp".to_string(),
            status: true,
        }))
        .await;
    wait_until(|| helper.channel.is_closed()).await;
    assert!(context.directory.is_empty());
}

#[tokio::test]
async fn test_unknown_auth_key_is_refused() {
    let mut config = test_config();
    config.licenses.development_mode = false;
    config.licenses.keys.insert("test-key".to_string(), u64::MAX);
    let context = context(config);

    let mut refused = Helper::attach(&context);
    refused.send(handshake("Alex", "stolen")).await;
    wait_until(|| refused.channel.is_closed()).await;
    assert!(context.directory.is_empty());

    let accepted = Helper::connect(&context, "Alex").await;
    let pair = context
        .directory
        .lookup(&PairId::new("Alex", "127.0.0.1"))
        .unwrap();
    assert!(Arc::ptr_eq(pair.auxiliary(), &accepted.channel));
}

#[tokio::test]
async fn test_helper_disconnect_removes_pair() {
    let context = context(test_config());
    let helper = Helper::connect(&context, PLAYER).await;
    let channel = Arc::clone(&helper.channel);

    drop(helper);
    wait_until(|| channel.is_closed()).await;
    assert!(context.directory.is_empty());
    assert_eq!(context.metrics.snapshot().auxiliary_closed, 1);
}

#[tokio::test]
async fn test_malformed_line_closes_channel() {
    use futures::SinkExt;

    let context = context(test_config());
    let mut helper = Helper::connect(&context, PLAYER).await;
    helper.lines.send("{not json".to_string()).await.unwrap();
    wait_until(|| helper.channel.is_closed()).await;
    assert!(context.directory.is_empty());
}
