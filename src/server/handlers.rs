//! Handler registration and lookup.
//!
//! Handlers are kept as an ordered list of `(name, function)` pairs and
//! looked up by exact name match, first match winning. A handler runs
//! synchronously inside the connection task with the decoded request, the
//! response to fill, and a shared reference to the server's custom data.

use crate::envelope::{Request, Response};
use crate::error::Result;

/// A registered method handler.
///
/// Fill the response through [`Response::set_retval`] or
/// [`Response::set_error`]; returning an `Err` marks the call failed with
/// the error's display text.
pub type HandlerFn<S> = dyn Fn(&Request, &mut Response, &S) -> Result<()> + Send + Sync;

/// Ordered method table.
pub struct HandlerTable<S> {
    entries: Vec<(String, Box<HandlerFn<S>>)>,
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a handler under a method name.
    ///
    /// Duplicate names are allowed; lookup returns the first registration.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Request, &mut Response, &S) -> Result<()> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Box::new(handler)));
    }

    /// Find the first handler registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<&HandlerFn<S>> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, handler)| handler.as_ref())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}
