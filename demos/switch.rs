//! Lists devices and toggles one channel.
//!
//! ```text
//! EWELINK_EMAIL=me@example.com EWELINK_PASSWORD=secret \
//!     cargo run --example switch -- 1000abcdef 1
//! ```

use ewelink::{Account, Client, ClientConfig, DeviceEvent};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let password = std::env::var("EWELINK_PASSWORD")?;
    let account = match (std::env::var("EWELINK_EMAIL"), std::env::var("EWELINK_PHONE")) {
        (Ok(email), _) => Account::email(email, password),
        (Err(_), Ok(phone)) => Account::phone(phone, password),
        _ => return Err("set EWELINK_EMAIL or EWELINK_PHONE".into()),
    };

    let mut client = Client::new(ClientConfig::from_env())?;
    let credentials = client.login(&account).await?;
    println!("Logged in, region {}", credentials.region);

    let devices = client.devices().await?;
    for device in &devices {
        println!(
            "{:<12} {:<24} {:<8} {} channel(s)",
            device.id,
            device.name,
            if device.online { "online" } else { "offline" },
            ewelink::switch::channel_count(device)
        );
    }

    let mut args = std::env::args().skip(1);
    let Some(device_id) = args.next() else {
        return Ok(());
    };
    let channel = args.next().map(|c| c.parse()).transpose()?.unwrap_or(1);

    let session = client.open_session().await?;
    println!("Session open, heartbeat every {:?}", session.heartbeat_interval());
    let mut events = client.subscribe()?;

    let state = client.toggle(&device_id, channel).await?;
    println!("Channel {} is now {}", channel, state);

    // Show whatever the cloud pushes for a few seconds
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = events.recv() => match event? {
                DeviceEvent::Online { device_id, online } => {
                    println!("{} online={}", device_id, online);
                }
                DeviceEvent::StateChanged { device_id, params } => {
                    println!("{} -> {:?}", device_id, params);
                }
            },
        }
    }

    client.close().await;
    Ok(())
}
