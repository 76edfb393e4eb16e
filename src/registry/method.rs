// Method Registry - per local actor instance, `method_name -> Handler`.
// Handlers are registered when the instance is constructed and
// deregistered on unregister; lookup is O(1) by name.

use crate::error::RuntimeError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What a handler resolves to, mirroring the non-error half of
/// `CallResult` — a handler never produces the wire-level `Failure`
/// variant directly, it returns `Err(RuntimeError)` and the Event Bridge
/// wraps that into `Response::Failure`.
#[derive(Clone, Debug)]
pub enum HandlerOutcome {
    Success(Vec<u8>),
    Void,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered method handler. Boxed so the registry can hold a
/// heterogeneous mix of user closures, each closing over its own actor
/// state, behind one uniform call signature.
pub type Handler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<HandlerOutcome, RuntimeError>> + Send + Sync>;

/// Per-instance map of method name to handler.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Handler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method_name: impl Into<String>, handler: Handler) {
        self.handlers.insert(method_name.into(), handler);
    }

    pub fn unregister(&mut self, method_name: &str) {
        self.handlers.remove(method_name);
    }

    pub fn get(&self, method_name: &str) -> Option<Handler> {
        self.handlers.get(method_name).cloned()
    }

    pub fn contains(&self, method_name: &str) -> bool {
        self.handlers.contains_key(method_name)
    }
}
