use std::process::ExitCode;

fn main() -> ExitCode {
    match vcsimd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("vcsimd: {error}");
            ExitCode::FAILURE
        }
    }
}
