//! # Feature Modules
//!
//! Per-tunnel features that can be toggled at runtime.
//!
//! ## Components
//! - [`Module`]: identity, enabled flag, toggle, update and option hooks
//! - [`TickingModule`]: a module with a periodic worker
//! - [`ModuleRegistry`]: owns a tunnel's modules and their workers
//! - Built-ins: [`nofall`], [`antiknockback`], [`flight`], [`spammer`], and
//!   helper-side [`remote`] modules
//!
//! Modules never own their tunnel; they hold a weak back-reference set
//! once at registration.

pub mod antiknockback;
pub mod flight;
pub mod nofall;
pub mod registry;
pub mod remote;
pub mod spammer;

pub use registry::ModuleRegistry;

use futures::future::BoxFuture;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::license::Feature;
use crate::service::tunnel::Tunnel;

/// Enabled flag and tunnel back-reference shared by every module.
#[derive(Debug, Default)]
pub struct ModuleState {
    enabled: AtomicBool,
    tunnel: OnceLock<Weak<Tunnel>>,
}

impl ModuleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the owning tunnel. Only the first call has any effect.
    pub fn bind(&self, tunnel: Weak<Tunnel>) {
        let _ = self.tunnel.set(tunnel);
    }

    pub fn tunnel(&self) -> Option<Arc<Tunnel>> {
        self.tunnel.get().and_then(Weak::upgrade)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Invert the flag and return the new value.
    pub fn flip(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::AcqRel)
    }
}

/// Lets the registry hand out a module as its concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub trait Module: AsAny + Send + Sync {
    fn identifier(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn state(&self) -> &ModuleState;

    fn register(&self, tunnel: Weak<Tunnel>) {
        self.state().bind(tunnel);
    }

    fn is_enabled(&self) -> bool {
        self.state().is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.state().set_enabled(enabled);
    }

    /// Remote modules run in the helper; the proxy only relays toggles.
    fn is_remote(&self) -> bool {
        false
    }

    /// Flip the module, returning the new status.
    fn toggle(&self) -> BoxFuture<'_, Result<bool>> {
        let enabled = self.state().flip();
        Box::pin(async move { Ok(enabled) })
    }

    /// Re-apply the module's effect after a toggle or an option change.
    fn update(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Change a runtime option, returning a line describing the new value.
    ///
    /// # Errors
    /// `ProtocolError::ModuleError` for an unknown option or a bad value.
    fn set_option(&self, option: &str, _value: &str) -> Result<String> {
        Err(ProtocolError::ModuleError(format!(
            "'{}' has no option '{option}'",
            self.identifier()
        )))
    }

    fn close(&self) {}
}

/// Interval and one-shot stop signal of a ticking module's worker.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    signal: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        let (stop, signal) = oneshot::channel();
        Self {
            interval,
            stop: Mutex::new(Some(stop)),
            signal: Mutex::new(Some(signal)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The worker's end of the stop signal. Handed out once, so at most one
    /// worker can ever run per module.
    pub fn take_signal(&self) -> Option<oneshot::Receiver<()>> {
        self.signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Interrupt the worker. Returns whether this call sent the signal.
    pub fn stop(&self) -> bool {
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match stop {
            Some(stop) => {
                let _ = stop.send(());
                true
            }
            None => false,
        }
    }
}

pub trait TickingModule: Module {
    fn ticker(&self) -> &Ticker;

    /// One unit of periodic work. Only called while enabled.
    fn tick(&self) -> BoxFuture<'_, Result<()>>;

    fn stop_worker(&self) {
        self.ticker().stop();
    }
}

/// A registered module, with or without a worker.
#[derive(Clone)]
pub enum ModuleHandle {
    Plain(Arc<dyn Module>),
    Ticking(Arc<dyn TickingModule>),
}

impl ModuleHandle {
    pub fn plain(module: impl Module + 'static) -> Self {
        ModuleHandle::Plain(Arc::new(module))
    }

    pub fn ticking(module: impl TickingModule + 'static) -> Self {
        ModuleHandle::Ticking(Arc::new(module))
    }

    pub fn identifier(&self) -> &str {
        match self {
            ModuleHandle::Plain(module) => module.identifier(),
            ModuleHandle::Ticking(module) => module.identifier(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ModuleHandle::Plain(module) => module.description(),
            ModuleHandle::Ticking(module) => module.description(),
        }
    }

    pub fn register(&self, tunnel: Weak<Tunnel>) {
        match self {
            ModuleHandle::Plain(module) => module.register(tunnel),
            ModuleHandle::Ticking(module) => module.register(tunnel),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            ModuleHandle::Plain(module) => module.is_enabled(),
            ModuleHandle::Ticking(module) => module.is_enabled(),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        match self {
            ModuleHandle::Plain(module) => module.set_enabled(enabled),
            ModuleHandle::Ticking(module) => module.set_enabled(enabled),
        }
    }

    pub fn is_remote(&self) -> bool {
        match self {
            ModuleHandle::Plain(module) => module.is_remote(),
            ModuleHandle::Ticking(module) => module.is_remote(),
        }
    }

    pub async fn toggle(&self) -> Result<bool> {
        match self {
            ModuleHandle::Plain(module) => module.toggle().await,
            ModuleHandle::Ticking(module) => module.toggle().await,
        }
    }

    pub async fn update(&self) -> Result<()> {
        match self {
            ModuleHandle::Plain(module) => module.update().await,
            ModuleHandle::Ticking(module) => module.update().await,
        }
    }

    pub fn set_option(&self, option: &str, value: &str) -> Result<String> {
        match self {
            ModuleHandle::Plain(module) => module.set_option(option, value),
            ModuleHandle::Ticking(module) => module.set_option(option, value),
        }
    }

    /// The module as a `T`, if that is what it is.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            ModuleHandle::Plain(module) => (**module).as_any().downcast_ref(),
            ModuleHandle::Ticking(module) => (**module).as_any().downcast_ref(),
        }
    }

    /// Stop the worker, if any, then release the module.
    pub fn close(&self) {
        match self {
            ModuleHandle::Plain(module) => module.close(),
            ModuleHandle::Ticking(module) => {
                module.stop_worker();
                module.close();
            }
        }
    }
}

/// Register the built-in modules the tunnel's license allows.
///
/// The spammer is not gated.
pub fn register_defaults(tunnel: &Arc<Tunnel>) -> Result<()> {
    let settings = &tunnel.config().modules;
    let gated: [(Feature, fn() -> ModuleHandle); 4] = [
        (Feature::NoFall, || ModuleHandle::plain(nofall::NoFall::new())),
        (Feature::AntiKnockback, || {
            ModuleHandle::plain(antiknockback::AntiKnockback::new())
        }),
        (Feature::Flight, || ModuleHandle::plain(flight::Flight::new())),
        (Feature::Esp, || {
            ModuleHandle::plain(remote::RemoteModule::new(
                remote::ESP,
                "Highlights players through walls",
            ))
        }),
    ];

    for (feature, build) in gated {
        if tunnel.has_feature(feature) {
            tunnel.register_module(build())?;
        } else {
            debug!(tunnel = tunnel.id(), ?feature, "Module not licensed");
        }
    }

    tunnel.register_module(ModuleHandle::ticking(spammer::Spammer::new(
        settings.spammer_message.clone(),
        settings.spammer_interval,
    )))
}
