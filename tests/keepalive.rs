//! Keep-alive supervision of the auxiliary channel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use intercept_tunnel::config::ProxyConfig;
use intercept_tunnel::error::constants;
use intercept_tunnel::protocol::auxiliary::{ClientboundMessage, ServerboundMessage};
use intercept_tunnel::protocol::packets::{text_component, LoginDisconnect};
use std::time::Duration;

fn fast_keepalive() -> ProxyConfig {
    let mut config = test_config();
    config.auxiliary.keepalive_interval = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn test_silent_helper_disconnects_bound_tunnel() {
    let context = context(fast_keepalive());
    let helper = Helper::connect(&context, PLAYER).await;
    let mut endpoints = open_tunnel(&context);
    start_login(&mut endpoints).await;

    let kicked: LoginDisconnect = recv(&mut endpoints.client).await;
    assert_eq!(kicked.reason, text_component(constants::REASON_AUXILIARY_LOST));
    within(endpoints.tunnel.closed()).await;
    assert!(helper.channel.is_closed());

    // Give any stray close path a chance to double count.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let snapshot = context.metrics.snapshot();
    assert_eq!(snapshot.keepalive_timeouts, 1);
    assert_eq!(snapshot.tunnels_closed, 1);
    assert_eq!(snapshot.auxiliary_closed, 1);
    assert!(context.directory.is_empty());
}

#[tokio::test]
async fn test_answering_helper_stays_connected() {
    let context = context(fast_keepalive());
    let mut helper = Helper::connect(&context, PLAYER).await;

    let mut answered = 0;
    while answered < 6 {
        let line = within(helper.lines.next()).await.unwrap().unwrap();
        assert_eq!(
            ClientboundMessage::from_line(&line).unwrap(),
            ClientboundMessage::KeepAliveRequest
        );
        helper
            .lines
            .send(ServerboundMessage::KeepAliveResponse.to_line().unwrap())
            .await
            .unwrap();
        answered += 1;
    }

    assert!(!helper.channel.is_closed());
    assert_eq!(context.metrics.snapshot().keepalive_timeouts, 0);
    assert_eq!(context.directory.len(), 1);
}

#[tokio::test]
async fn test_unpaired_silent_helper_is_dropped() {
    let context = context(fast_keepalive());
    let helper = Helper::attach(&context);

    wait_until(|| helper.channel.is_closed()).await;
    assert_eq!(context.metrics.snapshot().keepalive_timeouts, 1);
}
