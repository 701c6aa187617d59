use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match slide_cli::run_cli().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
