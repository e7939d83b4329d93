use std::process;

fn main() {
    if let Err(e) = maru::cli::run_cli() {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
