//! Sequential client - calls the `default` method over one connection.
//!
//! This example demonstrates:
//! - Connecting with a persistent connection
//! - Packing positional parameters
//! - Telling results from server-reported errors
//!
//! Start the server example first, then:
//!
//! ```sh
//! cargo run --example client -- 127.0.0.1:9000
//! ```

use wirecall::{Client, Packager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let destination = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());

    let mut client = Client::builder(destination)
        .persistent(true)
        .connect()
        .await?;

    for round in 0u64..10 {
        let mut params = Packager::array(2);
        params.push_str("round")?.push_uint(round)?;
        let response = client.call("default", Some(params)).await?;
        match response.result() {
            Ok(Some(value)) => println!("[OKEY]: {value}"),
            Ok(None) => println!("[OKEY]: (empty)"),
            Err(err) => println!("[ERROR]: {err}"),
        }
    }

    // An undefined method comes back as a server-reported error, not a
    // broken connection.
    let response = client.call("no_such_method", None).await?;
    if let Err(err) = response.result() {
        println!("[ERROR]: {err}");
    }

    Ok(())
}
