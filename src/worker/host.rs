//! Worker host: drives the controller through its lifecycle.
//!
//! The host supplies the only ordering guarantee the controller relies on:
//! install settles (or fails) before activate begins, and activate settles
//! before any fetch is served. Fetch handling itself may run concurrently;
//! fetch events share nothing mutable beyond the storage backend.

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheStorage, ServedResponse};

use super::controller::CacheController;
use super::net::NetworkFetch;

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Uninstalled,
  Installing,
  Installed,
  Activating,
  Active,
}

/// Host for one registered cache controller.
pub struct WorkerHost<S, N> {
  controller: CacheController<S, N>,
  state: WorkerState,
  /// Store generation fetches are served from once active. Usually the
  /// controller's own identity; an older generation after a failed install.
  active_store: Option<String>,
}

impl<S: CacheStorage, N: NetworkFetch> WorkerHost<S, N> {
  /// Register a controller with the host.
  pub fn new(controller: CacheController<S, N>) -> Self {
    info!("registered cache worker for {}", controller.identity());
    Self {
      controller,
      state: WorkerState::Uninstalled,
      active_store: None,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Store generation currently serving fetches, if the worker is active.
  pub fn active_store(&self) -> Option<&str> {
    self.active_store.as_deref()
  }

  /// Run install then activate, each awaited to settlement before the next.
  ///
  /// If install fails, the new generation never activates: a previously
  /// installed generation (if one exists) remains authoritative and keeps
  /// serving, otherwise the failure is surfaced.
  pub async fn start(&mut self) -> Result<()> {
    let current = self.controller.identity().store_name();

    self.state = WorkerState::Installing;
    match self.controller.on_install().await {
      Ok(count) => {
        self.state = WorkerState::Installed;
        info!("install complete: {} assets in {}", count, current);
      }
      Err(e) => {
        error!("install failed, {} will not activate: {}", current, e);
        return self.fall_back_to_previous(&current, e);
      }
    }

    self.state = WorkerState::Activating;
    // Cleanup failures inside on_activate are logged there and never fatal
    self.controller.on_activate().await?;

    self.state = WorkerState::Active;
    self.active_store = Some(current);
    Ok(())
  }

  /// Attach to a generation installed by an earlier run, without installing.
  ///
  /// Lookups against a store that was never installed simply miss, so every
  /// request falls through to the network.
  pub fn resume(&mut self) -> Result<()> {
    let current = self.controller.identity().store_name();

    match self.controller.existing_stores() {
      Ok(names) if names.contains(&current) => {}
      Ok(_) => warn!("store {} is not installed, serving network-only", current),
      Err(e) => warn!("could not enumerate cache stores: {}", e),
    }

    self.state = WorkerState::Active;
    self.active_store = Some(current);
    Ok(())
  }

  /// Serve one fetch event. Only valid while the worker is active.
  pub async fn handle_fetch(&self, request: &Url) -> Result<ServedResponse> {
    let store = match (&self.state, &self.active_store) {
      (WorkerState::Active, Some(store)) => store,
      _ => return Err(eyre!("Worker is not active, cannot serve {}", request)),
    };

    self.controller.serve_from(store, request).await
  }

  fn fall_back_to_previous(&mut self, current: &str, install_err: color_eyre::Report) -> Result<()> {
    let previous = self
      .controller
      .existing_stores()?
      .into_iter()
      .find(|name| name != current);

    match previous {
      Some(name) => {
        warn!("previous generation {} remains authoritative", name);
        self.state = WorkerState::Active;
        self.active_store = Some(name);
        Ok(())
      }
      None => {
        self.state = WorkerState::Uninstalled;
        Err(install_err)
      }
    }
  }
}
