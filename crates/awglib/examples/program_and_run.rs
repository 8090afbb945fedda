//! APS2 bring-up example.
//!
//! Connects to an APS2, prints its status bank, initializes the clocks and
//! DACs, then plays a sine wave on channel 1 and a square wave on channel 2
//! from the internal trigger for a few seconds.
//!
//! # Requirements
//!
//! - An APS2 reachable over UDP
//! - The device address adjusted for your network
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=awglib_aps2=debug cargo run -p awglib --example program_and_run
//! ```

use std::time::Duration;

use awglib::aps2::{Aps2Builder, RunMode, TriggerSource};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Adjust this to match your device's address.
    let address = "192.168.2.2";

    println!("Connecting to APS2 at {}...", address);
    let mut aps = Aps2Builder::new(address)
        .command_timeout(Duration::from_millis(500))
        .sync_retries(4)
        .build()
        .await?;

    let status = aps.read_status().await?;
    println!("{}", status);
    println!("Uptime: {:.1} s", status.uptime());

    aps.init(false).await?;
    let mhz = aps.sampling_rate().await?;
    println!("Sampling rate: {} MHz", mhz);

    let samples = 1200;
    let sine: Vec<f32> = (0..samples)
        .map(|i| (2.0 * std::f32::consts::PI * i as f32 / samples as f32).sin())
        .collect();
    let square: Vec<f32> = (0..samples)
        .map(|i| if i < samples / 2 { 0.8 } else { -0.8 })
        .collect();

    aps.set_waveform(0, &sine).await?;
    aps.set_waveform(1, &square).await?;
    aps.set_channel_scale(1, 0.5).await?;

    for channel in 0..2 {
        aps.set_run_mode(channel, RunMode::Waveform).await?;
        aps.set_channel_enabled(channel, true).await?;
    }

    aps.set_trigger_source(TriggerSource::Internal).await?;
    aps.set_trigger_interval(10e-6).await?;
    println!("Trigger interval: {:.1} us", aps.trigger_interval().await? * 1e6);

    println!("\nPlaying for 5 seconds...");
    aps.run().await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    aps.stop().await?;

    aps.disconnect().await?;
    println!("Done.");
    Ok(())
}
