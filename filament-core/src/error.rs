//! Error Types
//!
//! Two families of errors exist in the reactive core:
//!
//! - [`ReactiveError`] covers invalid arguments. These are returned (or, for
//!   the non-`try` convenience constructors, raised as a panic) at the call
//!   site and are never retried.
//!
//! - [`CallbackError`] covers failures inside user callbacks (subscribers,
//!   watchers, cleanups). These are caught where they happen and routed to an
//!   error handler so that sibling observers still get notified.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// An invalid argument passed to a reactive primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// Only JSON objects and arrays can be wrapped in a reactive proxy.
    #[error("cannot create a reactive proxy over a {kind} value")]
    NotProxyable { kind: &'static str },

    /// The proxy was frozen and refuses structural or value mutation.
    #[error("cannot mutate frozen reactive object (property `{property}`)")]
    Frozen { property: String },

    /// A signal handle was stored as the value of another signal.
    #[error("a signal cannot hold another signal (`{type_name}`)")]
    NestedSignal { type_name: &'static str },

    /// An array length outside of the representable range was requested.
    #[error("invalid array length {0}")]
    InvalidLength(i64),

    /// A non-index key was used on a reactive array.
    #[error("`{key}` is not a valid array index")]
    InvalidIndex { key: String },

    /// A property was assigned a value of the wrong type.
    #[error("property `{property}` expects {expected}")]
    InvalidValue {
        property: String,
        expected: &'static str,
    },

    /// An array-only operation was attempted on an object proxy.
    #[error("operation `{operation}` requires a reactive array")]
    NotAnArray { operation: &'static str },

    /// `set` was called on a computed created without a setter.
    #[error("computed value is read-only")]
    ReadOnlyComputed,

    /// The primitive was already disposed.
    #[error("reactive primitive has been disposed")]
    Disposed,
}

/// A failure raised inside a user callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The callback panicked; the payload message is preserved when it is a
    /// string.
    #[error("callback of {effect} panicked: {message}")]
    Panicked { effect: String, message: String },
}

impl CallbackError {
    /// Build an error from a `catch_unwind` payload.
    pub(crate) fn from_panic(effect: impl Into<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self::Panicked {
            effect: effect.into(),
            message,
        }
    }
}

/// Handler invoked with callback failures.
pub type ErrorHandler = Rc<dyn Fn(&CallbackError)>;

thread_local! {
    static FALLBACK_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install the handler used for callback failures on effects that did not
/// register their own `on_error` handler.
///
/// Returns the previously installed handler, if any.
pub fn set_fallback_error_handler<F>(handler: F) -> Option<ErrorHandler>
where
    F: Fn(&CallbackError) + 'static,
{
    FALLBACK_HANDLER.with(|slot| slot.borrow_mut().replace(Rc::new(handler)))
}

/// Remove the fallback handler, restoring the default (log via `tracing`).
pub fn clear_fallback_error_handler() -> Option<ErrorHandler> {
    FALLBACK_HANDLER.with(|slot| slot.borrow_mut().take())
}

/// Route a callback failure to `local` if present, otherwise to the fallback.
///
/// The handler is cloned out of its slot before being called, so handlers
/// may themselves install or clear handlers.
pub(crate) fn report(error: &CallbackError, local: Option<&ErrorHandler>) {
    if let Some(handler) = local {
        handler(error);
        return;
    }

    let fallback = FALLBACK_HANDLER.with(|slot| slot.borrow().clone());
    match fallback {
        Some(handler) => handler(error),
        None => tracing::error!(%error, "unhandled reactive callback error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn panic_payload_is_preserved() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let err = CallbackError::from_panic("subscriber#1", payload);
        assert_eq!(
            err,
            CallbackError::Panicked {
                effect: "subscriber#1".into(),
                message: "boom".into()
            }
        );

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let err = CallbackError::from_panic("watcher", payload);
        assert!(err.to_string().contains("owned"));
    }

    #[test]
    fn local_handler_takes_precedence() {
        let local_hits = Rc::new(Cell::new(0));
        let fallback_hits = Rc::new(Cell::new(0));

        let f = fallback_hits.clone();
        set_fallback_error_handler(move |_| f.set(f.get() + 1));

        let l = local_hits.clone();
        let local: ErrorHandler = Rc::new(move |_: &CallbackError| l.set(l.get() + 1));

        let err = CallbackError::Panicked {
            effect: "e".into(),
            message: "m".into(),
        };
        report(&err, Some(&local));
        assert_eq!(local_hits.get(), 1);
        assert_eq!(fallback_hits.get(), 0);

        report(&err, None);
        assert_eq!(fallback_hits.get(), 1);

        assert!(clear_fallback_error_handler().is_some());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ReactiveError::InvalidLength(-1).to_string(),
            "invalid array length -1"
        );
        assert_eq!(
            ReactiveError::NotProxyable { kind: "number" }.to_string(),
            "cannot create a reactive proxy over a number value"
        );
    }
}
