//! Pairs with an encrypted television and prints the credentials.
//!
//! Usage: cargo run -p viera-core --example pair -- 192.168.1.50

use std::io::{self, BufRead, Write};

use viera_core::{ClientConfig, DeviceIdentity, Television, config};

#[tokio::main]
async fn main() -> Result<(), viera_core::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viera_core=debug".into()),
        )
        .init();

    let host = std::env::args()
        .nth(1)
        .ok_or_else(|| viera_core::Error::InvalidArgument("usage: pair <host>".into()))?;
    let tv = Television::connect(DeviceIdentity::new("pairing", host), ClientConfig::default()).await?;

    tv.request_pin_code(None).await?;
    loop {
        print!("PIN shown on the television: ");
        io::stdout().flush()?;
        let mut pin = String::new();
        io::stdin().lock().read_line(&mut pin)?;

        match tv.authorize_pin_code(pin.trim()).await {
            Ok(credentials) => {
                println!("{}={}", config::ENV_APP_ID, credentials.app_id);
                println!("{}={}", config::ENV_ENCRYPTION_KEY, credentials.expose_encryption_key());
                return Ok(());
            }
            // A fresh PIN is already on screen.
            Err(e) if e.is_decrypt() => println!("Wrong PIN, try again."),
            Err(e) => return Err(e),
        }
    }
}
