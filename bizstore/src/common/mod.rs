mod constants;
mod convertible;
mod lock;
mod retry;
mod time;
mod value;

pub use constants::*;
pub use convertible::*;
pub use lock::*;
pub use retry::*;
pub use time::*;
pub use value::*;
