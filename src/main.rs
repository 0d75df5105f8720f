use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    gdrive_backup::cli::main().await
}
