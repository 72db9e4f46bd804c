//! Domain repositories over a [StoreGateway](crate::store::StoreGateway).

mod talk;
mod user;

pub use talk::*;
pub use user::*;
