//! Standalone server - answers the `default` method.
//!
//! This example demonstrates:
//! - Building a server with the fluent builder
//! - Registering a handler that echoes the caller's parameters
//! - Running until a termination signal arrives
//!
//! # Running
//!
//! ```sh
//! cargo run --example server -- 127.0.0.1:9000
//! cargo run --example client -- 127.0.0.1:9000
//! ```
//!
//! A unix socket path works as the destination too.

use wirecall::{Packager, Server, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let destination = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());

    let server = Server::builder(destination)
        .standalone(true)
        .log_level("info")
        .register("default", |request, response, _state| {
            let mut retval = Packager::map(3);
            retval.push_str("status")?;
            retval.push_int(0)?;
            retval.push_str("parameters")?;
            retval.push_value(request.params().unwrap_or(&Value::Null))?;
            retval.push_str("data")?;
            let mut data = Packager::array(3);
            data.push_bool(true)?
                .push_double(0.2342)?
                .push_str("dummy")?;
            retval.push_packager(data)?;
            response.set_retval(retval)
        })
        .bind()
        .await?;

    // Blocks until SIGTERM, SIGINT or SIGQUIT.
    server.run().await;
    Ok(())
}
