use std::process::ExitCode;

fn main() -> ExitCode {
    ratify_cli::run()
}
