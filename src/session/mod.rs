pub mod state;
pub mod stream;
