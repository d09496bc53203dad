mod advisory;
mod channel;
mod classify;
mod cli;
mod config;
mod engine;
mod log;
mod paths;
mod project;
mod prompt;
mod session;
mod shell_completion;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use advisory::CommandAdvisory;
use cli::{Cli, Command, ProjectsCommand};
use config::AppConfig;
use engine::{Engine, EngineEvent};
use project::{Project, ProjectStore};
use session::{SessionState, SessionStatus};

fn app_data_dir(cwd: &Path, config: &AppConfig) -> PathBuf {
    let dir = Path::new(&config.paths.app_data_dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        cwd.join(dir)
    }
}

fn find_project(store: &ProjectStore, key: &str) -> Result<Project> {
    store
        .find(key)
        .cloned()
        .with_context(|| format!("no project named or with id '{key}' (see `oprime projects list`)"))
}

/// Run the loop until the session settles, then tell the user what happened
/// and what they can do next.
fn run_session(mut engine: Engine, project_name: &str) -> Result<()> {
    let stop_tx = engine.event_sender();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(EngineEvent::Stop);
    })
    .context("failed to install Ctrl-C handler")?;

    match engine.run_until_settled()? {
        SessionStatus::TaskComplete => {
            println!("Task complete.");
        }
        SessionStatus::PausedAwaitingUserInput { question } => {
            println!("The advisory needs your input:");
            println!("  {question}");
            println!("Answer with: oprime resume {project_name} \"<your answer>\"");
        }
        SessionStatus::Idle => {
            println!("Session stopped.");
        }
        SessionStatus::Error { kind, message } => {
            bail!("session failed ({kind}): {message}");
        }
        other => bail!("session settled in unexpected state: {other}"),
    }
    Ok(())
}

fn print_status(project: &Project, state: &SessionState) {
    println!("project:          {} ({})", project.name, project.id);
    println!("workspace:        {}", project.workspace_root.display());
    println!("status:           {}", state.status);
    println!("history turns:    {}", state.store.len());
    match &state.last_instruction {
        Some(instruction) => {
            let first_line = instruction.lines().next().unwrap_or_default();
            println!("last instruction: {first_line}");
        }
        None => println!("last instruction: (none yet)"),
    }
    if !state.store.context_summary.is_empty() {
        println!("summary:          present ({} chars)", state.store.context_summary.len());
    }
}

fn config_source_label(config_path: Option<&PathBuf>) -> String {
    match config_path {
        Some(p) => p.display().to_string(),
        None => "(defaults)".to_string(),
    }
}

fn render_config(config: &AppConfig, config_path: Option<&PathBuf>, json: bool) -> Result<String> {
    let payload = serde_json::json!({
        "paths": {
            "instructions_dir": config.paths.instructions_dir,
            "logs_dir": config.paths.logs_dir,
            "app_data_dir": config.paths.app_data_dir,
        },
        "advisory": {
            "program": config.advisory.program,
            "args": config.advisory.args,
            "timeout_secs": config.advisory.timeout_secs,
        },
        "session": {
            "result_timeout_secs": config.session.result_timeout_secs,
            "poll_interval_millis": config.session.poll_interval_millis,
            "debounce_millis": config.session.debounce_millis,
            "max_history_turns": config.session.max_history_turns,
            "max_context_tokens": config.session.max_context_tokens,
            "summarization_interval": config.session.summarization_interval,
        },
        "source_path": config_source_label(config_path),
    });

    if json {
        serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
    } else {
        let mut out = String::new();
        out.push_str(&format!("config source: {}\n", config_source_label(config_path)));
        out.push_str(&format!(
            "advisory: {} {} (timeout {}s)\n",
            config.advisory.program,
            config.advisory.args.join(" "),
            config.advisory.timeout_secs
        ));
        out.push_str(&format!(
            "channel: {}/ -> {}/ (result timeout {}s, poll {}ms, debounce {}ms)\n",
            config.paths.instructions_dir,
            config.paths.logs_dir,
            config.session.result_timeout_secs,
            config.session.poll_interval_millis,
            config.session.debounce_millis
        ));
        out.push_str(&format!(
            "history: {} turns in window, ~{} tokens, summarize every {} turns\n",
            config.session.max_history_turns,
            config.session.max_context_tokens,
            config.session.summarization_interval
        ));
        Ok(out)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "oprime=warn",
        0 => "oprime=info",
        1 => "oprime=debug",
        _ => "oprime=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = AppConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .oprime/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Projects { command } => match command {
            ProjectsCommand::List => {
                let store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
                if store.projects().is_empty() {
                    println!("No projects registered. Add one with `oprime projects add`.");
                } else {
                    for p in store.projects() {
                        println!("{}  {}  {}", p.id, p.name, p.workspace_root.display());
                        println!("    goal: {}", p.overall_goal);
                    }
                }
            }
            ProjectsCommand::Add { name, root, goal } => {
                let mut store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
                let project = store.add(&name, &root, &goal)?;
                println!("Registered '{}' ({})", project.name, project.id);
            }
            ProjectsCommand::SetGoal { project, goal } => {
                let mut store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
                let id = find_project(&store, &project)?.id;
                store.set_goal(id, &goal)?;
                println!("Updated goal for '{project}'.");
            }
        },
        Command::Start { project, goal } => {
            let store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
            let project = find_project(&store, &project)?;
            let goal = goal.unwrap_or_else(|| project.overall_goal.clone());
            let advisory = Arc::new(CommandAdvisory::new(&config.advisory));
            let name = project.name.clone();
            let mut engine = Engine::new(project, config, advisory)?;
            engine.start_task(&goal)?;
            run_session(engine, &name)?;
        }
        Command::Resume { project, answer } => {
            let store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
            let project = find_project(&store, &project)?;
            let advisory = Arc::new(CommandAdvisory::new(&config.advisory));
            let name = project.name.clone();
            let mut engine = Engine::new(project, config, advisory)?;
            engine.resume_with_user_input(&answer)?;
            run_session(engine, &name)?;
        }
        Command::Status { project } => {
            let store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
            let project = find_project(&store, &project)?;
            let state = SessionState::load(
                &project.workspace_root,
                project.id,
                config.session.history_limits(),
            )?;
            print_status(&project, &state);
        }
        Command::Stop { project } => {
            let store = ProjectStore::load(&app_data_dir(&cwd, &config))?;
            let project = find_project(&store, &project)?;
            let advisory = Arc::new(CommandAdvisory::new(&config.advisory));
            let mut engine = Engine::new(project, config, advisory)?;
            engine.stop()?;
            println!("Session stopped.");
        }
        Command::Config { json } => {
            print!("{}", render_config(&config, config_path.as_ref(), json)?);
        }
        Command::Completions { shell } => {
            shell_completion::print(shell)?;
        }
    }

    Ok(())
}
