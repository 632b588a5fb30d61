use crate::domain::entities::EngineState;
use anyhow::Result;

/// Durable storage for the scheduler state.
///
/// Implementations must replace the stored state atomically so a crash
/// mid-write leaves the previous version intact.
pub trait StateRepository: Send {
    fn load(&self) -> Result<EngineState>;
    fn save(&self, state: &EngineState) -> Result<()>;
}
