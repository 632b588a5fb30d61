pub mod conflict;
pub mod schedule;
