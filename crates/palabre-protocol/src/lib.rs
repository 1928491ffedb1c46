//! palabre protocol - line-oriented wire format
//!
//! Every message is one newline-terminated UTF-8 line. This crate knows how
//! to classify lines sent by clients and how to render the lines the relay
//! sends back; it does no I/O.

pub mod message;
pub mod parse;

pub use message::ServerMessage;
pub use parse::{requested_name, strip_line_terminator, ClientLine, QUIT_COMMAND};
