//! Lists Viera televisions on the local network.
//!
//! Usage: cargo run -p viera-core --example discover

use viera_core::{DEFAULT_DISCOVERY_TIMEOUT, discovery};

#[tokio::main]
async fn main() -> Result<(), viera_core::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "viera_core=info".into()),
        )
        .init();

    let (mut found, _handle) = discovery::discover_stream(DEFAULT_DISCOVERY_TIMEOUT).await?;
    let mut count = 0;
    while let Some(tv) = found.recv().await {
        count += 1;
        let model = tv
            .specs
            .as_ref()
            .map(|s| format!("{} ({})", s.model_number, if s.requires_encryption { "encrypted" } else { "open" }))
            .unwrap_or_else(|| "unknown model".into());
        println!("{}  {}:{}  {}", tv.device.id, tv.device.host, tv.device.port, model);
        for app in &tv.apps {
            println!("    {}  {}", app.id, app.name);
        }
    }

    if count == 0 {
        println!("No televisions found. Multicast to 239.255.255.250:1900 must be allowed.");
    }
    Ok(())
}
