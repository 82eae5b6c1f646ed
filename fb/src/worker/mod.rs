//! Worker side of the bus

mod client;
mod command;

pub use client::{ERROR_REPORT, Worker};
pub use command::{CLOSE, CloseFlag, Command, CommandTable, PING, PONG, into_values};
