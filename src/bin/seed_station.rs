use chrono::{Duration, Utc};

use wind_station_hub::adapters::journal::{FileJournal, TelemetryJournal};
use wind_station_hub::domain::models::{TelemetrySample, to_iso8601};

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to seed station: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "stations".to_string());
    let mut uuid: Option<String> = None;
    let mut minutes: i64 = 60;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--data-dir" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--data-dir requires a value".to_string());
                };
                data_dir = value.clone();
                index += 2;
            }
            "--uuid" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--uuid requires a value".to_string());
                };
                uuid = Some(value.clone());
                index += 2;
            }
            "--minutes" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--minutes requires a value".to_string());
                };
                minutes = value
                    .parse()
                    .map_err(|_| format!("--minutes must be a number, got {value}"))?;
                if minutes < 1 {
                    return Err("--minutes must be at least 1".to_string());
                }
                index += 2;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let Some(uuid) = uuid else {
        return Err("--uuid is required".to_string());
    };

    let journal = FileJournal::open(&data_dir).map_err(|error| error.to_string())?;
    let now = Utc::now();
    let start = now - Duration::minutes(minutes);
    let total = minutes * 60;

    for second in 0..total {
        let at = start + Duration::seconds(second);
        let sample = TelemetrySample::new(to_iso8601(at), synthetic_speed(second))
            .with_field("battery_v", 3.9);
        journal
            .append(&uuid, &sample, at)
            .map_err(|error| error.to_string())?;
    }

    println!("seeded {total} samples for {uuid} into {data_dir}");
    Ok(())
}

/// Slow swell with a five second gust every ten minutes.
fn synthetic_speed(second: i64) -> f64 {
    let base = 5.0 + 2.0 * (second as f64 / 90.0).sin();
    let gust = if second % 600 < 5 { 4.0 } else { 0.0 };
    ((base + gust) * 10.0).round() / 10.0
}

fn print_help() {
    println!("seed_station");
    println!();
    println!("Usage:");
    println!("  cargo run --bin seed_station -- --uuid <uuid> [--data-dir <dir>] [--minutes <n>]");
    println!();
    println!("Options:");
    println!("  --uuid <uuid>      station key to write under");
    println!("  --data-dir <dir>   journal root (default: $DATA_DIR or ./stations)");
    println!("  --minutes <n>      length of the synthetic history at 1 Hz (default: 60)");
}
