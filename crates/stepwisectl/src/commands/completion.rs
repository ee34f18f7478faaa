//! Shell completion generation for stepwisectl
//!
//! - stepwisectl completion bash > /etc/bash_completion.d/stepwisectl
//! - stepwisectl completion zsh  > ~/.zsh/completion/_stepwisectl
//! - stepwisectl completion fish > ~/.config/fish/completions/stepwisectl.fish

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io;

use crate::cli::Cli;

pub fn execute(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
