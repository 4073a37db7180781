use tracing_subscriber::EnvFilter;

use cccopy::cli::{self, Cli};

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);
    std::process::exit(cli::run(cli));
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the `--debug` flag.
fn init_tracing(debug: bool) {
    let default = if debug { "cccopy=debug" } else { "cccopy=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
