//! Telnet transport.
//!
//! - [`option`] — byte-level negotiation filter
//! - [`bridge`] — synchronous, retrying bridge over an async session
//! - [`shell`] — the bridge as a [`crate::Transport`]

pub mod bridge;
pub mod option;
pub mod shell;

pub use bridge::{Dialer, TcpDialer, TelnetBridge, TelnetStream, MAX_ATTEMPTS};
pub use option::OptionFilter;
pub use shell::TelnetShell;
