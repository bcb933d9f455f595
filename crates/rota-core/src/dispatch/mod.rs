//! Rotating dispatch of messages from a pool of accounts into one channel.

pub mod edit;
pub mod sanitize;
pub mod scheduler;
pub mod selection;
pub mod types;

pub use edit::{parse_selection, AssignmentEdit};
pub use sanitize::{sanitize, sanitize_value, RawDispatchConfig};
pub use scheduler::DispatchScheduler;
pub use types::{Assignment, DispatchConfig, DispatchMode, Message};
