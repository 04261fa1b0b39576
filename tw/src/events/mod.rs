//! Task lifecycle events
//!
//! The orchestrator emits a [`TaskEvent`] on every admission, terminal status
//! and forced abort; observers subscribe through the [`EventBus`].

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use types::TaskEvent;
