fn main() {
    if let Err(err) = ev_dashboard::app::run_live_tail() {
        eprintln!("live tail startup failed: {err}");
        std::process::exit(1);
    }
}
