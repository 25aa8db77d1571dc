//! One invocation: registry setup, pipeline run, result reporting.

use soci_wrapper_core::{LogContext, WrapperConfig};
use soci_wrapper_runtime::{
    EcrRegistry, Failure, InvocationRequest, Outcome, Pipeline, SociIndexBuilder,
};
use tokio::sync::watch;

use crate::signals::spawn_shutdown_trigger;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// The invocation may succeed if retried (sysexits `EX_TEMPFAIL`).
pub const EXIT_TEMPFAIL: i32 = 75;

pub const MSG_REGISTRY_INIT_ERROR: &str = "Remote registry initialization error";

/// Exit status for a pipeline result.
pub fn exit_code(result: &Result<Outcome, Failure>) -> i32 {
    match result {
        Ok(_) => EXIT_SUCCESS,
        Err(failure) if failure.is_retryable() => EXIT_TEMPFAIL,
        Err(_) => EXIT_FAILURE,
    }
}

/// Print the result message to stdout (and the error to stderr).
pub fn report(result: &Result<Outcome, Failure>) {
    match result {
        Ok(outcome) => println!("{}", outcome.message()),
        Err(failure) => {
            println!("{}", failure.message);
            eprintln!("Error: {}", failure.error);
        }
    }
}

/// Run one invocation and return the process exit status.
pub async fn process(request: InvocationRequest, config: WrapperConfig) -> i32 {
    let registry_url = request.registry_url();
    let ctx = LogContext::new(&request.repository, request.digest.as_str())
        .with_registry_url(&registry_url);
    let region = config.effective_region(&request.region).to_string();

    let registry = match EcrRegistry::connect(registry_url, &region).await {
        Ok(registry) => registry,
        Err(e) => {
            ctx.error(MSG_REGISTRY_INIT_ERROR, &e);
            println!("{}", MSG_REGISTRY_INIT_ERROR);
            eprintln!("Error: {}", e);
            return if e.is_retryable() {
                EXIT_TEMPFAIL
            } else {
                EXIT_FAILURE
            };
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger = spawn_shutdown_trigger(shutdown_tx, config.timeout);

    let pipeline = Pipeline::new(registry, SociIndexBuilder::new(), config.scratch_root.clone());
    let result = pipeline.run_with_context(ctx, &request, shutdown_rx).await;
    trigger.abort();

    report(&result);
    exit_code(&result)
}
