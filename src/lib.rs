//! # wirecall
//!
//! Request/response RPC over TCP or Unix sockets with a compact binary
//! framing: an 82-byte header, an 8-byte codec marker, and a msgpack
//! envelope.
//!
//! ## Architecture
//!
//! - **Client**: one connection, strictly sequential calls, every socket
//!   wait bounded by a timeout
//! - **Server**: a worker pool sharing one listener; each connection runs
//!   a header→body→dispatch→write state machine with an idle timeout and
//!   optional persistent connections
//!
//! ## Example
//!
//! ```ignore
//! use wirecall::{Client, Packager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::builder("127.0.0.1:8383")
//!         .persistent(true)
//!         .connect()
//!         .await?;
//!
//!     let mut params = Packager::array(1);
//!     params.push_str("hello")?;
//!     let response = client.call("default", Some(params)).await?;
//!     println!("{}", response.result()?.unwrap_or(&wirecall::Value::Null));
//!     Ok(())
//! }
//! ```

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod error;
pub mod pack;
pub mod protocol;
pub mod transport;

mod client;
mod logging;
mod pidfile;
mod server;

pub use client::{Client, ClientBuilder, CLIENT_NAME, DEFAULT_TIMEOUT};
pub use envelope::{status, Request, Response};
pub use error::{Result, WirecallError};
pub use pack::{decode, decode_as, Kind, Packager, Value};
pub use server::{
    HandlerFn, HandlerTable, Server, ServerBuilder, DEFAULT_IDLE_TIMEOUT,
};
pub use transport::Endpoint;
