use anyhow::Result;
use std::process::ExitCode;

mod app;
mod logging;

fn main() -> Result<ExitCode> {
    let args = kb_migrate::cli::parse();
    app::run(args)
}
