use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::sync::mpsc;

use aurora_core::{
    profile, Config, Gate, HttpWorkflowApi, SecurityAction, SessionController, SessionEvent,
    SessionState, Severity, Role, WorkflowApi,
};

#[derive(Parser)]
#[command(name = "aurora")]
#[command(about = "Chat with the aurora infrastructure workflow service")]
struct Cli {
    /// Backend URL (overrides the config file and AURORA_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive workflow session
    Chat,
    /// Show the signed-in user
    Whoami,
    /// Print the URL for the browser-based sign-in
    Login,
    /// Print the sign-out URL and forget the cached profile
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|_| Config::new());
    let api_url = cli.api_url.unwrap_or_else(|| config.api_url());
    let api = HttpWorkflowApi::new(&api_url)?;

    match cli.command {
        Commands::Chat => chat(api, &config).await?,
        Commands::Whoami => whoami(&api).await?,
        Commands::Login => {
            println!("Open {} in a browser to sign in.", api.login_url().bold());
        }
        Commands::Logout => {
            println!("Open {} in a browser to sign out.", api.logout_url().bold());
            let _ = profile::clear();
        }
    }

    Ok(())
}

async fn whoami(api: &HttpWorkflowApi) -> Result<()> {
    let status = api.me().await?;
    if status.authenticated {
        if let Some(user) = status.user {
            println!("{} {}", "Signed in as".green(), user.name.bold());
            if !user.email.is_empty() {
                println!("  {}", user.email.dimmed());
            }
            let _ = profile::store(&user);
        } else {
            println!("{}", "Signed in.".green());
        }
    } else {
        println!("{}", "Not signed in.".yellow());
        println!("Open {} in a browser to sign in.", api.login_url().bold());
    }
    Ok(())
}

async fn chat(api: HttpWorkflowApi, config: &Config) -> Result<()> {
    match api.me().await {
        Ok(status) if status.authenticated => {
            if let Some(user) = status.user {
                println!("{} {}", "Welcome,".green(), user.name.bold());
                let _ = profile::store(&user);
            }
        }
        Ok(_) => {
            if let Some(cached) = profile::load_cached() {
                println!("{} {}", "Welcome back,".green(), cached.name.bold());
            }
            println!("{}", "You are not signed in.".yellow());
            println!("Open {} in a browser, then try again.", api.login_url().bold());
            return Ok(());
        }
        Err(err) => bail!("could not reach the backend at {}: {}", api.base_url(), err),
    }

    println!(
        "\nDescribe the infrastructure you need. {}",
        "(/new starts over, /quit exits)".dimmed()
    );
    prompt();

    let download_base = api.base_url().to_string();
    let (handle, mut events) =
        SessionController::spawn_with_interval(Arc::new(api), config.poll_interval());

    // Blocking stdin reader; the select loop below stays async.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut view = SessionState::default();
    let mut printed = 0usize;
    let mut shown_files = false;
    let mut shown_security = false;

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                let text = line.trim().to_string();
                if text.is_empty() {
                    prompt();
                    continue;
                }
                if text == "/quit" {
                    break;
                }
                if text == "/new" {
                    handle.reset();
                    printed = 0;
                    shown_files = false;
                    shown_security = false;
                    prompt();
                    continue;
                }
                route_input(&handle, &view, text, &mut printed, &mut shown_files, &mut shown_security);
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Updated(state) => {
                        render_update(&view, &state, &mut printed, &mut shown_files, &mut shown_security, &download_base);
                        view = state;
                    }
                    SessionEvent::ActionFailed { error, .. } => {
                        eprintln!("{} {}", "error:".red(), error);
                        prompt();
                    }
                }
            }
        }
    }

    handle.shutdown();
    Ok(())
}

fn route_input(
    handle: &aurora_core::SessionHandle,
    view: &SessionState,
    text: String,
    printed: &mut usize,
    shown_files: &mut bool,
    shown_security: &mut bool,
) {
    match view.active_gate() {
        Gate::Approval => match text.to_lowercase().as_str() {
            "y" | "yes" | "approve" => handle.approve(true),
            "n" | "no" | "revise" => handle.approve(false),
            _ => {
                println!(
                    "{}",
                    "Answer with 'yes' to apply or 'no' to request a revision.".yellow()
                );
                prompt();
            }
        },
        Gate::SecurityReview => match text.to_lowercase().as_str() {
            "fix" => handle.security_decision(SecurityAction::Fix),
            "ignore" => handle.security_decision(SecurityAction::Ignore),
            _ => {
                println!(
                    "{}",
                    "Answer with 'fix' to remediate or 'ignore' to proceed.".yellow()
                );
                prompt();
            }
        },
        _ => {
            if view.is_terminal() {
                // A finished workflow cannot take more input; start fresh
                // with the typed text as the first message.
                handle.reset();
                *printed = 0;
                *shown_files = false;
                *shown_security = false;
            } else if view.thread.is_some() && !view.send_enabled(&text) {
                println!("{}", "The workflow is still running, one moment...".yellow());
                return;
            }
            handle.send_message(text);
        }
    }
}

fn render_update(
    previous: &SessionState,
    state: &SessionState,
    printed: &mut usize,
    shown_files: &mut bool,
    shown_security: &mut bool,
    download_base: &str,
) {
    if state.transcript.len() < *printed {
        // Transcript was rebuilt shorter (retraction or reset).
        *printed = state.transcript.len();
    }
    for message in &state.transcript[*printed..] {
        // The user's own lines are already on the terminal.
        if message.role == Role::Assistant {
            println!("{} {}", "aurora:".cyan().bold(), message.content);
        }
    }
    *printed = state.transcript.len();

    if let Some(snapshot) = &state.snapshot {
        if snapshot.has_config() && !*shown_files {
            *shown_files = true;
            println!("\n{}", "Generated configuration".bold());
            for (name, content) in &snapshot.terraform_config {
                println!("{}", format!("--- {} ---", name).dimmed());
                println!("{}", content);
            }
        }
        if !snapshot.security_issues.is_empty() && !*shown_security {
            *shown_security = true;
            let severity = snapshot.severity();
            let label = format!("Security scan: {}", severity);
            if severity == Severity::High {
                println!("\n{}", label.red().bold());
            } else {
                println!("\n{}", label.yellow().bold());
            }
            println!("{}", snapshot.security_issues);
        }
    }

    let gate = state.active_gate();
    if gate != previous.active_gate() {
        match gate {
            Gate::MissingInfo => {
                if let Some(snapshot) = &state.snapshot {
                    if !snapshot.missing_question.is_empty() {
                        println!("{} {}", "aurora asks:".cyan().bold(), snapshot.missing_question);
                    }
                }
                prompt();
            }
            Gate::Approval => {
                println!("{}", "Apply this configuration? [yes/no]".bold());
                prompt();
            }
            Gate::SecurityReview => {
                println!("{}", "Security review required: 'fix' or 'ignore'?".bold());
                prompt();
            }
            Gate::None => {}
        }
    }

    if state.is_terminal() && !previous.is_terminal() {
        println!("\n{}", "Workflow complete.".green().bold());
        if let Some(thread) = &state.thread {
            println!(
                "Download the bundle: {}",
                format!("{}/chat/{}/download", download_base, thread).bold()
            );
        }
        println!("{}", "Type a new request to start over, or /quit.".dimmed());
        prompt();
    }
}

fn prompt() {
    use std::io::Write;
    print!("{} ", ">".bold());
    let _ = io::stdout().flush();
}
