//! Filament Core
//!
//! This crate provides the core runtime for the Filament fine-grained
//! reactivity system. It implements:
//!
//! - Reactive primitives (signals, reactive objects, computed values,
//!   effects, watchers)
//! - The signal/effect dependency graph and its notification pipeline
//! - Effect scopes for bulk disposal
//! - A property subscription store with immediate and batched delivery
//! - A microtask-style scheduler for batched notifications
//!
//! The runtime is single-threaded: all state lives in thread-locals and the
//! handles are `!Send`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the dependency graph arena and the scheduler
//! - `reactive`: reactive primitives and dependency tracking
//! - `error`: error types and callback error routing
//! - `config`: per-thread runtime configuration
//!
//! # Example
//!
//! ```rust
//! use filament_core::reactive::{Computed, Effect, Signal};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Computed::new(move |_| c.get() * 2);
//!
//! // Create an effect
//! let seen = Rc::new(Cell::new(0));
//! let (d, s) = (doubled.clone(), seen.clone());
//! let _effect = Effect::new(move || s.set(d.get()));
//!
//! // Update the signal
//! count.set(5);
//! assert_eq!(seen.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{config, configure, RuntimeConfig};
pub use error::{
    clear_fallback_error_handler, set_fallback_error_handler, CallbackError, ErrorHandler,
    ReactiveError, Result,
};
pub use graph::{batch, flush};
