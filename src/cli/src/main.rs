//! soci-wrapper entry point.

use soci_wrapper_cli::args::{parse_args, Parsed, USAGE};
use soci_wrapper_cli::process::{process, EXIT_FAILURE};
use soci_wrapper_core::{LogFormat, WrapperConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let request = match parse_args(std::env::args_os()) {
        Parsed::Run(request) => request,
        Parsed::Info(e) => e.exit(),
        Parsed::Usage(message) => {
            println!("{}", USAGE);
            eprintln!("{}", message.trim_end());
            std::process::exit(EXIT_FAILURE);
        }
    };

    let config = match WrapperConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    init_tracing(config.log_format);

    let code = process(request, config).await;
    std::process::exit(code);
}
