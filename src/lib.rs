pub mod account;
pub mod aggregate;
pub mod clock;
pub mod config;
pub mod economy;
pub mod energy;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod reliability;
pub mod reply;
pub mod store;
pub mod verify;
