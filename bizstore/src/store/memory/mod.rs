mod collection;
mod config;
mod gateway;
mod module;

pub use config::*;
pub use gateway::*;
pub use module::*;
