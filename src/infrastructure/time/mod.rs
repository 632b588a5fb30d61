pub mod clock;

pub use clock::{SystemTimeSource, VirtualTimeSource};
