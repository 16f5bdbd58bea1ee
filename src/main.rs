mod cli;

use clap::Parser;
use cli::Cli;

/// Logs go to stderr so `--json` output stays parseable
fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr);

    let result = if log_format == "json" {
        builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init()
    } else {
        builder
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("[routestat] Warning: logging not initialized: {}", e);
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    cli.run()
}
