use docker_inside::Error;
use docker_inside::cli::{self, Cli};
use docker_inside::orchestrator::{EXIT_ORCHESTRATION_FAILURE, error_exit_code};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    docker_inside::logging::init(cli.verbosity());

    let code = match cli::run_command(cli).await {
        Ok(code) => code,
        Err(e) => report(&e),
    };
    std::process::exit(code);
}

/// Log a failed run and pick its exit code.
fn report(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(Error::Interrupted) => {
            tracing::warn!("Interrupted");
            error_exit_code(&Error::Interrupted)
        }
        Some(e) => {
            match e.hint() {
                Some(hint) => tracing::error!(hint, "{}", e),
                None => tracing::error!("{}", e),
            }
            error_exit_code(e)
        }
        None => {
            tracing::error!("{:#}", err);
            EXIT_ORCHESTRATION_FAILURE
        }
    }
}
