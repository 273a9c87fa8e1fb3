pub mod account;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod transport;

#[cfg(test)]
mod tests;

pub const DAEMON_HOSTNAME: &str = "127.0.0.1";
pub const DAEMON_DEFAULT_PORT: u16 = 44930;
pub const DAEMON_DEFAULT_ENDPOINT: &str =
    const_format::concatcp!("ws://", DAEMON_HOSTNAME, ":", DAEMON_DEFAULT_PORT);
