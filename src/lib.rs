pub mod api;
pub mod commands;
pub mod config;
pub mod display;
pub mod event;
pub mod flow;
pub mod progress;
pub mod protocol;
pub mod replay;
pub mod session;
