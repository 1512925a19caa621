//! The process-wide engine.
//!
//! Installed once at startup; every later lookup shares it. Tests and
//! embedders that want isolation build their own [`AioEngine`] instead.

use std::sync::OnceLock;

use super::builder::{AioEngine, EngineBuilder, EngineHandle};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::info;

static GLOBAL: OnceLock<AioEngine> = OnceLock::new();

/// Install `engine` as the process-wide engine.
///
/// Fails with [`ErrorKind::Config`] if one is already installed; the
/// rejected engine is shut down when dropped.
pub fn install(engine: AioEngine) -> Result<EngineHandle> {
    let mut fresh = false;
    let installed = GLOBAL.get_or_init(|| {
        fresh = true;
        engine
    });
    if !fresh {
        return Err(Error::new(ErrorKind::Config).with_message("global engine already installed"));
    }
    info!(
        target_workers = installed.config().target_workers,
        max_workers = installed.config().max_workers,
        "global engine installed"
    );
    Ok(installed.handle())
}

/// The process-wide engine, if one has been installed.
#[must_use]
pub fn handle() -> Option<EngineHandle> {
    GLOBAL.get().map(AioEngine::handle)
}

/// The process-wide engine, building it from the environment on first use.
pub fn handle_or_init() -> Result<EngineHandle> {
    if let Some(engine) = GLOBAL.get() {
        return Ok(engine.handle());
    }
    let engine = EngineBuilder::from_env()?.build()?;
    match install(engine) {
        Ok(handle) => Ok(handle),
        // Lost the race to another initializer; use theirs.
        Err(err) if err.kind() == ErrorKind::Config => {
            GLOBAL.get().map(AioEngine::handle).ok_or(err)
        }
        Err(err) => Err(err),
    }
}
