//! Integration tests of bizstore against the gateway selected by feature
//! (`fjall` by default, `memory` for the in-memory gateway).

pub mod test_util;
