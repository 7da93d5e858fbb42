pub mod parse;
pub mod sse;
pub mod types;
