mod connection;
mod filter;
mod find_options;
mod gateway;
pub mod memory;
mod store_module;
mod update;

pub use connection::*;
pub use filter::*;
pub use find_options::*;
pub use gateway::*;
pub use store_module::*;
pub use update::*;
