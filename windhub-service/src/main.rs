fn main() {
    if let Err(err) = wind_station_hub::app::run() {
        eprintln!("service startup failed: {err}");
        std::process::exit(1);
    }
}
