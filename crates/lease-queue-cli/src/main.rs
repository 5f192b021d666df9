use lease_queue_cli::{report_error, run_cli};

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        report_error(&e, &mut std::io::stderr());
        std::process::exit(e.exit_code());
    }
}
