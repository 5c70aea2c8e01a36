//! Store backends for the host apply engine.

pub mod memory;
pub mod seaorm;

pub use memory::InMemoryHostApplyStore;
pub use seaorm::SeaOrmHostApplyStore;
