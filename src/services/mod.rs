pub mod appointments;
pub mod conflicts;
pub mod notifications;
pub mod ownership;
pub mod permissions;
pub mod schedule_blocks;
pub mod state_machine;
