pub mod messages;
pub mod services;
pub mod session_registry;
pub mod workers;
