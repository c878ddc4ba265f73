pub mod dispatcher;
pub mod sweeper;
