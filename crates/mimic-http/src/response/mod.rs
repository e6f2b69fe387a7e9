//! Response delivery: rendering, delays, and transport faults.

mod delay;
mod fault;
mod renderer;

pub use delay::{delay, DelayDistribution};
pub use fault::{inject, Fault};
pub use renderer::{RenderOutcome, ResponseRenderer};
