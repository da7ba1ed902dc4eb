//! Differential filesystem exerciser.
//!
//! The engine drives two directory trees through an identical randomized
//! sequence of POSIX operations and checks after every step that both
//! trees answered the same way. One tree is typically a filesystem under
//! development and the other a reference; any behavioral difference
//! surfaces as a divergence error naming the operation and both answers.
//!
//! A run is fully determined by its seed: the rule chosen at each step,
//! every argument, and every entity selection replay identically, so a
//! reported divergence is reproducible from the seed alone.

pub mod acl;
pub mod admin;
pub mod config;
pub mod error;
pub mod exec;
pub mod identity;
pub mod oplog;
pub mod oracle;
pub mod outcome;
pub mod pool;
pub mod rules;
pub mod session;
pub mod stats;
pub mod strategy;

pub use config::{AdminEndpoint, EngineConfig};
pub use error::{EngineError, Result};
pub use outcome::OpResult;
pub use session::Session;
pub use stats::Statistics;
