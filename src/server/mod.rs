//! HTTP server for the call-session service.
//!
//! This module implements the HTTP surface that:
//! - Accepts provider status and keypad callbacks, verifies signatures, and
//!   always acknowledges (provider boundary, see `webhook`)
//! - Installs input flows and exposes read-only call inspection
//! - Provides a health check with dispatch statistics
//!
//! # Endpoints
//!
//! - `POST /webhook/status` - Provider status callback (always 200 after
//!   signature verification)
//! - `POST /webhook/digits` - Provider keypad callback (always 200 after
//!   signature verification)
//! - `POST /calls/{call_id}/flow` - Installs the input flow for a call
//! - `GET /calls/{call_id}` - Returns the call session as JSON
//! - `GET /health` - Liveness + dispatch statistics

use std::sync::Arc;

pub mod calls;
pub mod health;
pub mod webhook;

pub use calls::{call_handler, install_flow_handler};
pub use health::health_handler;
pub use webhook::{digits_handler, status_handler};

use crate::config::Config;
use crate::dispatch::{DeliveryChannel, DispatchQueue};
use crate::hints::HintDetector;
use crate::input::InputStepEngine;
use crate::store::CallStore;
use crate::webhooks::Reconciler;

/// Shared application state.
///
/// Passed to all handlers via Axum's `State` extractor. Every component is
/// explicitly constructed and injected here; there are no module-level
/// singletons.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn CallStore>,
    reconciler: Reconciler,
    engine: Arc<InputStepEngine>,
    hints: Arc<HintDetector>,
    queue: Arc<DispatchQueue>,
    webhook_secret: Option<Vec<u8>>,
}

impl AppState {
    /// Wires the full component graph from a configuration, a store, and a
    /// delivery channel.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn CallStore>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        let queue = Arc::new(DispatchQueue::new(
            Arc::clone(&store),
            channel,
            config.dispatch.clone(),
        ));
        let engine = Arc::new(InputStepEngine::new());
        let hints = Arc::new(HintDetector::new(Arc::clone(&store), Arc::clone(&queue)));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&hints),
            Arc::clone(&queue),
            config.dedupe,
        );

        AppState {
            inner: Arc::new(AppStateInner {
                store,
                reconciler,
                engine,
                hints,
                queue,
                webhook_secret: config.webhook_secret.clone(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.inner.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn engine(&self) -> &Arc<InputStepEngine> {
        &self.inner.engine
    }

    pub fn hints(&self) -> &Arc<HintDetector> {
        &self.inner.hints
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.inner.queue
    }

    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.inner.webhook_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook/status", post(status_handler))
        .route("/webhook/digits", post(digits_handler))
        .route("/calls/{call_id}/flow", post(install_flow_handler))
        .route("/calls/{call_id}", get(call_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
