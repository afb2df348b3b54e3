//! Twin-agent mission orchestrator CLI.
//!
//! `tandem mission` starts a mission against a project directory, streams
//! agent output, and turns into a reply prompt whenever the agents pause
//! for user input. `tandem map` and `tandem skills` expose the codebase
//! mapper and the skill store directly.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tandem::core::types::{MissionState, StartReply};
use tandem::io::config::load_config;
use tandem::io::huddle::Huddle;
use tandem::io::mapper;
use tandem::io::process::{OutputObserver, ProcessRunner, ShellRunner};
use tandem::logging;
use tandem::mission::Orchestrator;

/// How long the CLI sits on an unsettled mission before detaching.
const ATTACH_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser)]
#[command(name = "tandem", version, about = "Twin-agent mission orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a mission against a project directory.
    Mission {
        /// Task description handed to the planning agent.
        task: String,
        /// Project directory to work in.
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Override the configured iteration budget.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print (and persist) the codebase map for a project directory.
    Map {
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Print stored skills ranked by similarity to a query.
    Skills {
        query: String,
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Maximum number of skills to print.
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Mission {
            task,
            project,
            max_iterations,
        } => cmd_mission(&task, &project, max_iterations),
        Command::Map { project } => cmd_map(&project),
        Command::Skills {
            query,
            project,
            top,
        } => cmd_skills(&query, &project, top),
    }
}

fn cmd_mission(task: &str, project: &Path, max_iterations: Option<u32>) -> Result<()> {
    let mut config = load_config(&project.join(".brain").join("config.toml"))?;
    if let Some(limit) = max_iterations {
        config.max_iterations = limit;
    }

    let runner = ShellRunner::new();
    let printer: OutputObserver = Arc::new(|agent: &str, line: &str| {
        println!("[{agent}] {line}");
    });
    runner.subscribe(printer);

    let huddle = Arc::new(Huddle::new(project.join(".brain"))?);
    let orchestrator = Orchestrator::new(runner, huddle, config)?;
    orchestrator.set_project_root(project)?;

    let stdin = io::stdin();
    let mut payload = task.to_string();
    loop {
        match orchestrator.start_mission(&payload) {
            StartReply::Started => println!("Mission started: {payload}"),
            StartReply::Resumed => println!("Mission resumed."),
            StartReply::Busy(state) => println!("Orchestrator is busy ({}).", state.as_str()),
        }

        match orchestrator.wait_until_settled(ATTACH_LIMIT) {
            MissionState::Idle => {
                println!("Mission complete.");
                return Ok(());
            }
            MissionState::AwaitingUser => {
                println!("Agents paused: {}", orchestrator.latest_question());
                print!("reply (empty to quit)> ");
                io::stdout().flush().context("flush prompt")?;
                let mut reply = String::new();
                stdin.lock().read_line(&mut reply).context("read reply")?;
                let reply = reply.trim();
                if reply.is_empty() || reply.eq_ignore_ascii_case("exit") {
                    return Ok(());
                }
                payload = reply.to_string();
            }
            state => {
                println!("Mission still {} after attach limit; detaching.", state.as_str());
                return Ok(());
            }
        }
    }
}

fn cmd_map(project: &Path) -> Result<()> {
    let path = mapper::save_map(project)?;
    let map = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    println!("{map}");
    Ok(())
}

fn cmd_skills(query: &str, project: &Path, top: usize) -> Result<()> {
    let huddle = Huddle::new(project.join(".brain"))?;
    let skills = huddle.query_similar(query, top)?;
    if skills.is_empty() {
        println!("No matching skills stored yet.");
        return Ok(());
    }
    for skill in skills {
        println!("# {}\n{}\n", skill.task, skill.lesson);
    }
    Ok(())
}
