//! Chat transport abstractions (IRC today).

pub mod port;
pub mod types;
