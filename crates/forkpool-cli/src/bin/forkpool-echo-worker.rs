//! forkpool echo worker.
//!
//! Speaks the worker protocol on stdin/stdout and logs to stderr.

use forkpool_cli::echo::EchoHandler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    forkpool_worker::serve(EchoHandler::from_env()).await?;
    Ok(())
}
