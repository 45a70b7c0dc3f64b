pub mod config;
pub mod maintenance;
pub mod sync;
pub mod watch;
