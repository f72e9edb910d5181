use std::process::ExitCode;

fn main() -> ExitCode {
    clearquote_cli::run()
}
