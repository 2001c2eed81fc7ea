use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    siteguard_cli::run().await
}
