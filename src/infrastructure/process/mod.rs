pub mod identity;
pub mod supervisor;

pub use identity::Identity;
pub use supervisor::{ProcessSupervisor, KILL_GRACE};
