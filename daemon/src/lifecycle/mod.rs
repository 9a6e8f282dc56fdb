//! Process lifecycle

mod shutdown;

pub use shutdown::{ShutdownReason, ShutdownSignal};
