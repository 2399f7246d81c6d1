//! Module registry and tick scheduler.
//!
//! Each ticking module gets at most one worker, started at registration:
//!
//! ```text
//! loop {
//!     interrupt fired  -> exit
//!     interval elapsed -> tick() if enabled, log errors, keep going
//! }
//! ```
//!
//! The interrupt is checked first, and a tick in progress always runs to
//! completion before the next check.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{ProtocolError, Result};
use crate::modules::{ModuleHandle, TickingModule};
use crate::service::tunnel::Tunnel;

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<BTreeMap<String, ModuleHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `module` and bind it to `owner`.
    ///
    /// # Errors
    /// `ProtocolError::ModuleError` on a duplicate identifier or once the
    /// registry is closed.
    pub fn register(&self, module: ModuleHandle, owner: Weak<Tunnel>) -> Result<()> {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::ModuleError(format!(
                "cannot register '{}' after close",
                module.identifier()
            )));
        }
        if modules.contains_key(module.identifier()) {
            return Err(ProtocolError::ModuleError(format!(
                "module '{}' already registered",
                module.identifier()
            )));
        }

        module.register(owner);
        if let ModuleHandle::Ticking(ticking) = &module {
            if let Some(signal) = ticking.ticker().take_signal() {
                let worker = tokio::spawn(run_worker(Arc::clone(ticking), signal));
                self.workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(worker);
            }
        }

        debug!(module = module.identifier(), "Module registered");
        modules.insert(module.identifier().to_string(), module);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<ModuleHandle> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    /// Run `f` on the module under `identifier` if it is a `T`.
    pub fn with_module<T: Any, R>(&self, identifier: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        let module = self.get(identifier)?;
        module.downcast_ref::<T>().map(f)
    }

    pub fn is_enabled(&self, identifier: &str) -> bool {
        self.get(identifier)
            .is_some_and(|module| module.is_enabled())
    }

    /// Registered identifiers in sorted order.
    pub fn identifiers(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers started over the registry's lifetime and not yet joined.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Apply a status reported from outside, without running the module's
    /// own toggle.
    ///
    /// # Errors
    /// `ProtocolError::ModuleError` if no such module is registered.
    pub fn acknowledge(&self, identifier: &str, status: bool) -> Result<()> {
        let module = self
            .get(identifier)
            .ok_or_else(|| ProtocolError::ModuleError(format!("unknown module '{identifier}'")))?;
        module.set_enabled(status);
        Ok(())
    }

    /// Stop every worker and close every module. Only the first call does
    /// anything.
    pub fn close_all(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let modules = std::mem::take(
            &mut *self.modules.write().unwrap_or_else(PoisonError::into_inner),
        );
        for module in modules.values() {
            module.close();
        }
        debug!(count = modules.len(), "Modules closed");
    }

    /// Wait for stopped workers to exit, aborting any still running after
    /// `grace`.
    pub async fn join_workers(&self, grace: Duration) {
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let deadline = Instant::now() + grace;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                warn!("Module worker did not stop in time, aborting");
                worker.abort();
            }
        }
    }
}

async fn run_worker(module: Arc<dyn TickingModule>, mut interrupt: oneshot::Receiver<()>) {
    let period = module.ticker().interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => break,
            _ = ticker.tick() => {
                if module.is_enabled() {
                    if let Err(e) = module.tick().await {
                        warn!(module = module.identifier(), error = %e, "Tick failed");
                    }
                }
            }
        }
    }
    debug!(module = module.identifier(), "Worker stopped");
}
