//! Handlers for server-initiated traffic.
//!
//! Servers send notifications (`window/logMessage`, `$/progress`, ...) and
//! reverse requests (`client/registerCapability`, ...) at any time, including
//! before the initialize response. Every incoming message is routed through a
//! [`HandlerTable`]; requests without a handler get `MethodNotFound` so the
//! server never blocks waiting for a reply.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::message::{Notification, RemoteError, Request, Response};

pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;
pub type RequestHandler = Arc<dyn Fn(Option<Value>) -> Result<Value, RemoteError> + Send + Sync>;

/// Method name → handler, separately for notifications and requests.
#[derive(Clone, Default)]
pub struct HandlerTable {
    notifications: HashMap<String, NotificationHandler>,
    requests: HashMap<String, RequestHandler>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The handlers every connection starts with.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for method in [
            "client/registerCapability",
            "client/unregisterCapability",
            "window/workDoneProgress/create",
        ] {
            table.on_request(method, |_| Ok(Value::Null));
        }
        table.on_notification("window/logMessage", relay_log_message);
        table.on_notification("window/showMessage", relay_log_message);
        table.on_notification("$/progress", |_| {});
        table.on_notification("textDocument/publishDiagnostics", |_| {});
        table
    }

    /// Register a notification handler. Returns true if one was replaced.
    pub fn on_notification<F>(&mut self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.notifications
            .insert(method.into(), Arc::new(handler))
            .is_some()
    }

    /// Register a request handler. Returns true if one was replaced.
    pub fn on_request<F>(&mut self, method: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Option<Value>) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.requests
            .insert(method.into(), Arc::new(handler))
            .is_some()
    }

    /// Layer `other` on top of this table; its entries win.
    pub fn extend(&mut self, other: HandlerTable) {
        self.notifications.extend(other.notifications);
        self.requests.extend(other.requests);
    }

    #[must_use]
    pub fn has_notification(&self, method: &str) -> bool {
        self.notifications.contains_key(method)
    }

    #[must_use]
    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    fn notification(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method).cloned()
    }

    fn request(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).cloned()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut notifications: Vec<_> = self.notifications.keys().collect();
        notifications.sort();
        let mut requests: Vec<_> = self.requests.keys().collect();
        requests.sort();
        f.debug_struct("HandlerTable")
            .field("notifications", &notifications)
            .field("requests", &requests)
            .finish()
    }
}

/// Forward `window/logMessage` / `window/showMessage` into tracing.
fn relay_log_message(params: Option<Value>) {
    let Some(params) = params else { return };
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match params.get("type").and_then(Value::as_u64) {
        Some(1) => tracing::error!(target: "polyglot_lsp::server", "{message}"),
        Some(2) => tracing::warn!(target: "polyglot_lsp::server", "{message}"),
        Some(3) => tracing::info!(target: "polyglot_lsp::server", "{message}"),
        _ => tracing::debug!(target: "polyglot_lsp::server", "{message}"),
    }
}

/// The live handler table of one connection.
///
/// Handlers are cloned out of the lock before they run, so a handler may
/// itself register new handlers.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    table: RwLock<HandlerTable>,
}

impl Dispatcher {
    pub fn new(table: HandlerTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut HandlerTable) -> bool) -> bool {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }

    pub fn dispatch_notification(&self, notification: Notification) {
        let handler = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .notification(&notification.method);
        match handler {
            Some(handler) => {
                let params = notification.params;
                if panic::catch_unwind(AssertUnwindSafe(|| handler(params))).is_err() {
                    tracing::error!(method = %notification.method, "notification handler panicked");
                }
            }
            None => tracing::trace!(method = %notification.method, "ignoring notification"),
        }
    }

    pub fn dispatch_request(&self, request: Request) -> Response {
        let handler = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .request(&request.method);
        match handler {
            Some(handler) => {
                let params = request.params;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(params)))
                    .unwrap_or_else(|_| {
                        tracing::error!(method = %request.method, "request handler panicked");
                        Err(RemoteError::new(
                            RemoteError::INTERNAL_ERROR,
                            format!("handler for {} panicked", request.method),
                        ))
                    });
                Response {
                    id: request.id,
                    outcome,
                }
            }
            None => {
                tracing::debug!(method = %request.method, "no handler for server request");
                Response::err(request.id, RemoteError::method_not_found(&request.method))
            }
        }
    }
}
