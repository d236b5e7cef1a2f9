pub mod cli;
pub mod config;
pub mod core;
pub mod net;
pub mod sim;
