// Target-specific transitive dependency split (mio/crossterm stack) is accepted for now.
#![allow(clippy::multiple_crate_versions)]

use stackline_cli::{CliError, display_chain};

fn main() {
    match stackline_cli::run() {
        Ok(code) => std::process::exit(code),
        Err(CliError::ArgumentParse(error)) => {
            eprint!("{error}");
            std::process::exit(1);
        }
        Err(error) => {
            eprintln!("error: {}", display_chain(&error));
            std::process::exit(1);
        }
    }
}
