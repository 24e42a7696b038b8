mod config;
mod error;
mod hosts;
mod localcmd;
mod nfs;
mod nftables;
mod platform;
mod ssh;
mod steps;
mod templates;
mod textpatch;
mod ui;
mod wireguard;
mod workflow;

use anyhow::bail;
use clap::{Parser, Subcommand};
use config::ProvisionRecord;
use tokio::sync::mpsc;
use workflow::engine::{run_workflow, EngineEvent, RunState};
use workflow::Registry;

#[derive(Parser)]
#[command(
    name = "arclink",
    version,
    about = "Provision a private WireGuard link between this workstation and a remote host"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full setup workflow: bootstrap SSH trust, stand up the tunnel,
    /// export the shared home, configure display forwarding
    Setup {
        /// Bootstrap target as user@host[:port]
        #[arg(long, env = "ARCLINK_TARGET")]
        target: Option<String>,

        /// Bootstrap password (prompted when omitted)
        #[arg(long, env = "ARCLINK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List the step catalog in execution order
    Steps,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { target, password } => run_setup(target, password).await,
        Commands::Steps => list_steps(),
    }
}

fn list_steps() -> anyhow::Result<()> {
    let registry = Registry::new()?;
    for (i, def) in registry.definitions().iter().enumerate() {
        println!("{:2}. {}  ({})", i + 1, def.label, def.id.as_str());
    }
    Ok(())
}

async fn run_setup(target: Option<String>, password: Option<String>) -> anyhow::Result<()> {
    // Registry problems are build mistakes; fail before touching anything.
    let registry = Registry::new()?;

    if let Err(e) = localcmd::check_local_sudo() {
        bail!("Local sudo is required. Run: sudo -v  (then retry). ({e})");
    }

    let target = match target {
        Some(t) => t,
        None => ui::prompt_target()?,
    };
    let (user, host, addr) = ssh::parse_connect_target(&target)?;
    let password = match password {
        Some(p) => p,
        None => ui::prompt_password(&user, &host)?,
    };

    let steps = registry.fresh_steps();
    let total = steps.len();
    let labels: Vec<&'static str> = steps.iter().map(|s| s.label).collect();
    let state = RunState::new(&user, &host, &addr, &password);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(run_workflow(steps, state, steps::execute, Some(events_tx)));

    let mut spinner = None;
    while let Some(ev) = events_rx.recv().await {
        match ev {
            EngineEvent::StepStarted { index } => {
                spinner = Some(ui::spinner(&format!(
                    "[Step {}/{}] {}",
                    index + 1,
                    total,
                    labels[index]
                )));
            }
            EngineEvent::StepFinished { index, err } => {
                if let Some(sp) = spinner.take() {
                    let mark = if err.is_none() { "ok" } else { "FAILED" };
                    sp.finish_with_message(format!(
                        "[Step {}/{}] {} — {mark}",
                        index + 1,
                        total,
                        labels[index]
                    ));
                }
            }
        }
    }

    let outcome = run.await?;
    if let Some(err) = outcome.error {
        let failed = outcome
            .steps
            .iter()
            .position(|s| s.state == workflow::StepState::Failed)
            .unwrap_or(0);
        ui::print_step_failure(failed, total, labels[failed], &err.to_string());
        bail!("setup failed at step {}/{total}", failed + 1);
    }

    let record = ProvisionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        host: outcome.state.host.clone(),
        addr: outcome.state.addr.clone(),
        ready_as: outcome.state.ready_as.clone(),
        endpoint: outcome
            .state
            .wg
            .as_ref()
            .map(|wg| wg.endpoint.clone())
            .unwrap_or_default(),
        created_at: chrono::Utc::now(),
    };
    record.save()?;
    ui::print_summary(&record);
    Ok(())
}
