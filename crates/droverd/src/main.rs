use std::process::ExitCode;

fn main() -> ExitCode {
    match drover_config::Config::load() {
        Ok(config) => {
            if let Err(error) = config.prepare_spool() {
                eprintln!("Failed to prepare the spool directory: {error}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Failed to load configuration: {error}");
            ExitCode::FAILURE
        }
    }
}
