pub mod interval;
pub mod timespec;

pub use interval::Interval;
pub use timespec::{FieldKind, FieldSet, TimeSpec};
