/// Consumer registry and pull-subscription handles (per-event, global, one-shot).
pub mod consumer;
/// The emitter core: registration, dispatch and teardown.
pub mod emitter;
/// Error types: registration limits, non-blocking reads.
pub mod error;
/// Event naming traits and the name+payload pair.
pub mod event;
/// Listener registry: ordered callback lists and removal tokens.
pub mod listener;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Pull-subscription handles and the single-emission future.
pub use consumer::{GlobalSubscription, NextEvent, Subscription};
/// The emitter and its configuration.
pub use emitter::{Emitter, EmitterConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_LISTENERS};
/// Registration and read errors.
pub use error::{LimitExceeded, TryRecvError};
/// Event naming and the global-stream element.
pub use event::{Event, EventName, EventPayload};
/// Listener removal token.
pub use listener::ListenerId;
