// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// OpenRoboBrain: a minimal command-line harness around the core runtime.
#[derive(Parser, Debug)]
#[command(name = "orb", version, about)]
pub struct Cli {
    /// Path to an explicit config file, highest precedence over the layered
    /// defaults (/etc, XDG, workspace-local).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Agent id this invocation acts as. Determines the state/workspace
    /// directories and the session key.
    #[arg(long, default_value = "default")]
    pub agent_id: String,

    /// Emit debug-level tracing to stderr instead of the default info level.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a single utterance and print the reply.
    Process {
        /// The utterance to process. Reads stdin to EOF if omitted.
        text: Option<String>,
    },
    /// Read utterances from stdin, one per line, replying to each in turn
    /// until EOF.
    Serve,
    /// Print the effective configuration (after layering and merge) as YAML.
    ShowConfig,
    /// Cancel every in-flight bridge command immediately.
    EmergencyStop,
    /// Generate shell completions for the given shell.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
