use std::process::ExitCode;

fn main() -> ExitCode {
    callhook_cli::run()
}
