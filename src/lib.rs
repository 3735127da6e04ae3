pub mod board;
pub mod config;
pub mod hardware;
pub mod poller;
pub mod print_job;
pub mod printer;
pub mod protocol;
pub mod simulator;
pub mod web;

pub use board::{Board, BoardEvent};
pub use config::Config;
