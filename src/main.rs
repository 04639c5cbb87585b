use std::time::Duration;

use anyhow::{anyhow, Result};
use log::info;

use miscale_rs::prelude::*;

/// Read one profile field from the environment, falling back to `default`.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn profile_from_env() -> Result<UserProfile> {
    let defaults = UserProfile::default();
    let profile = UserProfile {
        gender: env_or("MISCALE_GENDER", defaults.gender)?,
        age: env_or("MISCALE_AGE", defaults.age)?,
        height_cm: env_or("MISCALE_HEIGHT_CM", defaults.height_cm)?,
        unit: env_or("MISCALE_UNIT", defaults.unit)?,
    };
    if profile.age == 0 || profile.height_cm <= 0.0 {
        return Err(anyhow!("MISCALE_AGE and MISCALE_HEIGHT_CM must be positive"));
    }
    Ok(profile)
}

fn print_measurement(m: &ScaleMeasurement, unit: WeightUnit, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(m)?);
        return Ok(());
    }
    print!(
        "[WEIGHT] {}  {:.2} {unit}",
        m.timestamp.format("%Y-%m-%d %H:%M:%S"),
        unit.from_kg(m.weight_kg),
    );
    if let (Some(fat), Some(water), Some(muscle), Some(bone), Some(visceral), Some(lbm)) = (
        m.body_fat_percent,
        m.water_percent,
        m.muscle_percent,
        m.bone_mass_kg,
        m.visceral_fat,
        m.lean_body_mass_kg,
    ) {
        print!(
            "  fat={fat:.1}%  water={water:.1}%  muscle={muscle:.1}%  bone={bone:.2} kg  \
             visceral={visceral:.1}  lbm={lbm:.2} kg  ({} Ω)",
            m.impedance.unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

async fn run<T: Transport + 'static>(
    transport: T,
    config: ScaleClientConfig,
    profile: UserProfile,
    json: bool,
) -> Result<()> {
    let unit = profile.unit;
    let mut client = ScaleClient::new(transport, config);

    info!("Scanning for scale …");
    let (mut rx, handle) = client.connect(profile).await?;

    // ── Ctrl-C → graceful disconnect ─────────────────────────────────────────
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Quit requested.");
            ctrl_c_handle.disconnect().await.ok();
        }
    });

    // ── Main event loop ──────────────────────────────────────────────────────
    while let Some(event) = rx.recv().await {
        match event {
            ScaleEvent::Connected(name) => info!("✅  Connected to: {name}"),
            ScaleEvent::Status(message) => info!("{message}"),
            ScaleEvent::Measurement(m) => print_measurement(&m, unit, json)?,
            ScaleEvent::Disconnected => {
                info!("❌  Disconnected from scale.");
                break;
            }
        }
    }

    client.teardown().await;
    info!("Event loop finished – exiting.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=miscale_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let simulate = std::env::args().any(|a| a == "--simulate");
    let json = std::env::args().any(|a| a == "--json");
    let sync_clock = std::env::args().any(|a| a == "--sync-clock");
    let profile = profile_from_env()?;
    info!(
        "Profile: {:?}, {} years, {} cm, display unit {}",
        profile.gender, profile.age, profile.height_cm, profile.unit
    );

    let config = ScaleClientConfig {
        sync_clock,
        ..ScaleClientConfig::default()
    };

    if simulate {
        info!("Simulation mode: using the built-in mock scale");
        let config = ScaleClientConfig {
            inactivity_timeout: Duration::from_secs(5),
            ..config
        };
        run(MockTransport::with_sample_data(), config, profile, json).await
    } else {
        let transport = BtleTransport::new().await?;
        run(transport, config, profile, json).await
    }
}
