mod document;
mod object_id;

pub use document::*;
pub use object_id::*;
