//! Main entry point for the fstree CLI app

fn main() -> std::process::ExitCode {
    if let Err(e) = fstree::cli_runner::run_cli_app() {
        match e.downcast_ref::<clap::Error>() {
            // Help and version requests arrive as clap errors too.
            Some(clap_err) => {
                let _ = clap_err.print();
                if !clap_err.use_stderr() {
                    return std::process::ExitCode::SUCCESS;
                }
            }
            None => eprintln!("Error: {}", e),
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
