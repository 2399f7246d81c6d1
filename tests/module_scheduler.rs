//! Ticking module workers attached to a live tunnel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::*;
use futures::future::BoxFuture;
use intercept_tunnel::error::{ProtocolError, Result};
use intercept_tunnel::modules::{Module, ModuleHandle, ModuleState, Ticker, TickingModule};
use intercept_tunnel::protocol::packets::ChatMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PERIOD: Duration = Duration::from_millis(10);

struct Metronome {
    state: ModuleState,
    ticker: Ticker,
    ticks: Arc<AtomicUsize>,
    fail: bool,
}

impl Metronome {
    fn handle(ticks: &Arc<AtomicUsize>, fail: bool) -> ModuleHandle {
        ModuleHandle::ticking(Self {
            state: ModuleState::new(),
            ticker: Ticker::new(PERIOD),
            ticks: Arc::clone(ticks),
            fail,
        })
    }
}

impl Module for Metronome {
    fn identifier(&self) -> &str {
        "metronome"
    }

    fn state(&self) -> &ModuleState {
        &self.state
    }
}

impl TickingModule for Metronome {
    fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    fn tick(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProtocolError::ModuleError("tick failed".to_string()));
            }
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_worker_ticks_only_while_enabled() {
    let context = context(test_config());
    let endpoints = open_tunnel(&context);
    let ticks = Arc::new(AtomicUsize::new(0));
    endpoints
        .tunnel
        .register_module(Metronome::handle(&ticks, false))
        .unwrap();
    assert_eq!(endpoints.tunnel.modules().worker_count(), 1);

    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 0);

    for _ in 0..3 {
        let before = ticks.load(Ordering::SeqCst);
        assert!(endpoints.tunnel.toggle_module("metronome").await.unwrap());
        assert_eq!(endpoints.tunnel.modules().worker_count(), 1);
        wait_until(|| ticks.load(Ordering::SeqCst) >= before + 3).await;

        assert!(!endpoints.tunnel.toggle_module("metronome").await.unwrap());
        assert_eq!(endpoints.tunnel.modules().worker_count(), 1);
        // A tick already running may still finish.
        tokio::time::sleep(PERIOD * 2).await;
        let settled = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }
}

#[tokio::test]
async fn test_failing_tick_keeps_worker_alive() {
    let context = context(test_config());
    let endpoints = open_tunnel(&context);
    let ticks = Arc::new(AtomicUsize::new(0));
    let handle = Metronome::handle(&ticks, true);
    handle.set_enabled(true);
    endpoints.tunnel.register_module(handle).unwrap();

    wait_until(|| ticks.load(Ordering::SeqCst) >= 4).await;
    assert!(!endpoints.tunnel.is_closed());
}

#[tokio::test]
async fn test_close_interrupts_worker() {
    let context = context(test_config());
    let endpoints = open_tunnel(&context);
    let ticks = Arc::new(AtomicUsize::new(0));
    let handle = Metronome::handle(&ticks, false);
    handle.set_enabled(true);
    endpoints.tunnel.register_module(handle).unwrap();
    wait_until(|| ticks.load(Ordering::SeqCst) >= 1).await;

    endpoints.tunnel.close();
    within(endpoints.tunnel.closed()).await;
    assert_eq!(endpoints.tunnel.modules().worker_count(), 0);

    let after_close = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(ticks.load(Ordering::SeqCst), after_close);
}

#[tokio::test]
async fn test_spammer_sends_chat_in_play() {
    let mut config = test_config();
    config.modules.spammer_interval = Duration::from_millis(20);
    config.modules.spammer_message = "buy gold".to_string();
    let context = context(config);
    let mut helper = Helper::connect(&context, PLAYER).await;
    let mut endpoints = open_tunnel(&context);
    complete_login(&mut endpoints, &mut helper, &secret(0x21)).await;

    endpoints.tunnel.toggle_module("spammer").await.unwrap();
    for _ in 0..2 {
        let chat: ChatMessage = recv(&mut endpoints.server).await;
        assert_eq!(chat.message, "buy gold");
    }
}
