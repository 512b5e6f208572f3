pub mod client;
pub mod registry;
pub mod watch;
