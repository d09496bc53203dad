//! Shell completion generation for the oprime CLI.

use std::io::{self, Write};

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;

use crate::cli::{Cli, CompletionShell};

pub fn print(shell: CompletionShell) -> Result<()> {
    write_script(shell, &mut io::stdout())
}

fn write_script(shell: CompletionShell, out: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    generate(clap_complete::Shell::from(shell), &mut cmd, "oprime", out);
    Ok(())
}
