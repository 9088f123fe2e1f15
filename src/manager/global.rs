//! Process-wide pool managers, one per flavor.
//!
//! Each is created on first access with default settings unless configured
//! beforehand. Statics are never dropped, so call [`shutdown_all`] before exit.

use super::{Flavor, PoolManager};
use crate::client::{Async, Blocking, ClientSettings, TrustPolicy};
use crate::utils::error::{PoolError, Result};
use std::sync::OnceLock;

static PLAIN: OnceLock<PoolManager<Blocking>> = OnceLock::new();
static TRUST_ALL: OnceLock<PoolManager<Blocking>> = OnceLock::new();
static ASYNC: OnceLock<PoolManager<Async>> = OnceLock::new();

fn trust_all_settings(settings: ClientSettings) -> ClientSettings {
    settings.with_trust(TrustPolicy::InsecureAcceptAll)
}

fn install<F: Flavor>(
    cell: &'static OnceLock<PoolManager<F>>,
    label: &str,
    settings: ClientSettings,
) -> Result<&'static PoolManager<F>> {
    let mut installed = false;
    let manager = cell.get_or_init(|| {
        installed = true;
        PoolManager::new(settings)
    });

    if installed {
        Ok(manager)
    } else {
        Err(PoolError::Config(format!(
            "{} pool manager is already configured",
            label
        )))
    }
}

/// Blocking pool with certificate validation.
pub fn plain() -> &'static PoolManager<Blocking> {
    PLAIN.get_or_init(|| PoolManager::new(ClientSettings::default()))
}

/// Blocking pool that accepts ANY server certificate. Insecure; for test
/// servers with self-signed certificates only.
pub fn trust_all() -> &'static PoolManager<Blocking> {
    TRUST_ALL.get_or_init(|| PoolManager::new(trust_all_settings(ClientSettings::default())))
}

pub fn asynchronous() -> &'static PoolManager<Async> {
    ASYNC.get_or_init(|| PoolManager::new(ClientSettings::default()))
}

pub fn configure_plain(settings: ClientSettings) -> Result<&'static PoolManager<Blocking>> {
    install(&PLAIN, "plain", settings)
}

/// The trust policy in `settings` is replaced with `InsecureAcceptAll`.
pub fn configure_trust_all(settings: ClientSettings) -> Result<&'static PoolManager<Blocking>> {
    install(&TRUST_ALL, "trust-all", trust_all_settings(settings))
}

pub fn configure_async(settings: ClientSettings) -> Result<&'static PoolManager<Async>> {
    install(&ASYNC, "async", settings)
}

/// Shut down every process-wide manager that was ever created.
pub fn shutdown_all() {
    if let Some(manager) = PLAIN.get() {
        manager.shutdown();
    }
    if let Some(manager) = TRUST_ALL.get() {
        manager.shutdown();
    }
    if let Some(manager) = ASYNC.get() {
        manager.shutdown();
    }
}
