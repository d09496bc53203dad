use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "oprime",
    about = "File-based coordination between an advisory LLM and a local executor",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage registered projects
    Projects {
        #[command(subcommand)]
        command: ProjectsCommand,
    },

    /// Start (or restart) the task loop for a project
    Start {
        /// Project name or id
        project: String,

        /// Goal for this run; defaults to the project's overall goal
        goal: Option<String>,
    },

    /// Answer a pending question and continue the task loop
    Resume {
        /// Project name or id
        project: String,

        /// Your answer to the advisory's question
        answer: String,
    },

    /// Show the persisted session status for a project
    Status {
        /// Project name or id
        project: String,
    },

    /// Stop a project's session and return it to idle
    Stop {
        /// Project name or id
        project: String,
    },

    /// Show effective configuration
    Config {
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List registered projects
    List,

    /// Register a new project
    Add {
        /// Unique project name
        name: String,

        /// Absolute path to the executor's workspace
        #[arg(long)]
        root: PathBuf,

        /// Overall goal the advisory works toward
        #[arg(long)]
        goal: String,
    },

    /// Replace a project's overall goal
    SetGoal {
        /// Project name or id
        project: String,

        /// New overall goal
        goal: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
        }
    }
}
