fn main() {
    if let Err(err) = station_sessions::app::run_reconcile() {
        eprintln!("reconciliation failed: {err}");
        std::process::exit(1);
    }
}
