//! Hexagonal ports of the mining loop.

mod outbound;

pub use outbound::{Clock, LoopReport, SupervisorLink, SystemClock};
