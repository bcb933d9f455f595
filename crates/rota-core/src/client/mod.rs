//! Chat-platform client abstractions.
//!
//! A concrete gateway connector implements [`port::ChatClient`]; the core only
//! ever talks to the platform through these traits.

pub mod loopback;
pub mod port;
pub mod types;
