//! Binary entry point for the Leadgate CLI.

use clap::Parser;
use leadgate_cli::{run, Cli};

fn main() {
    let cli = Cli::parse();
    let mut stdout = std::io::stdout();

    if let Err(e) = run(cli, &mut stdout) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
