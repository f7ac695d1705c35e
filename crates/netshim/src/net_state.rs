// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queryable network/security status.
//!
//! The TLS layer and the credential loader report conditions here that an
//! application usually wants to surface in a status display: "no trusted
//! certificate chain, running in bootstrap mode" or "the configured server
//! key could not be parsed". Handlers registered with
//! [`NetworkState::add_handler`] run only when a value actually changes.
//!
//! # Example
//!
//! ```
//! use netshim::net_state::{NetStateItem, NetworkState};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let state = NetworkState::new();
//! let calls = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&calls);
//! state.add_handler(move |item, _status| {
//!     if item == NetStateItem::NoCertChain {
//!         seen.fetch_add(1, Ordering::Relaxed);
//!     }
//! });
//!
//! state.set_no_cert_chain(true);
//! state.set_no_cert_chain(true); // unchanged, no notification
//! assert_eq!(calls.load(Ordering::Relaxed), 1);
//! assert!(state.snapshot().no_cert_chain);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::provision::CertRole;

/// Which status item changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetStateItem {
    NoCertChain,
    SecurityConfError,
    UnverifiedConnections,
}

/// A configured credential could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfError {
    pub role: CertRole,
    pub message: String,
}

/// Point-in-time copy of the network state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    /// No trusted certificate chain is available for client connections.
    pub no_cert_chain: bool,
    /// Last credential provisioning error, if any.
    pub security_conf_error: Option<SecurityConfError>,
    /// Client connections established without verifying the server.
    pub unverified_connections: u64,
}

/// Opaque handle returned by [`NetworkState::add_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(NetStateItem, &NetworkStatus) + Send + Sync>;

/// Shared network status with change notification.
pub struct NetworkState {
    status: Mutex<NetworkStatus>,
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    next_handler: AtomicU64,
}

impl NetworkState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(NetworkStatus::default()),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        }
    }

    /// Register a change handler.
    ///
    /// Handlers run on the thread that made the change, after the state lock
    /// is released, so they may query the state themselves.
    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(NetStateItem, &NetworkStatus) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn snapshot(&self) -> NetworkStatus {
        self.status.lock().clone()
    }

    pub fn no_cert_chain(&self) -> bool {
        self.status.lock().no_cert_chain
    }

    pub fn set_no_cert_chain(&self, value: bool) {
        self.update(NetStateItem::NoCertChain, |status| {
            if status.no_cert_chain == value {
                return false;
            }
            status.no_cert_chain = value;
            true
        });
    }

    pub fn set_security_conf_error(&self, error: Option<SecurityConfError>) {
        self.update(NetStateItem::SecurityConfError, |status| {
            if status.security_conf_error == error {
                return false;
            }
            status.security_conf_error = error;
            true
        });
    }

    pub(crate) fn record_unverified_connection(&self) {
        self.update(NetStateItem::UnverifiedConnections, |status| {
            status.unverified_connections += 1;
            true
        });
    }

    fn update(&self, item: NetStateItem, apply: impl FnOnce(&mut NetworkStatus) -> bool) {
        let snapshot = {
            let mut status = self.status.lock();
            if !apply(&mut status) {
                return;
            }
            status.clone()
        };

        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(item, &snapshot);
        }
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkState")
            .field("status", &*self.status.lock())
            .field("handlers", &self.handlers.lock().len())
            .finish()
    }
}
