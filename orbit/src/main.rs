//! Entry point for the orbit CLI. Parses args, resolves a profile, and runs
//! the telemetry client with a console observer until interrupted.

use std::env;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use orbit::client::{ClientConfig, TelemetryClient};
use orbit::history::{GaugeHistory, SNAPSHOT_HISTORY};
use orbit::observer::TelemetryObserver;
use orbit::profiles::{
    endpoint_with_token, load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile,
};
use orbit::protocol::{InboundEvent, OutboundCommand};
use orbit::state::{ConnectionState, TelemetrySnapshot};
use orbit_tasks::{Task, TaskStatus, TaskWatcher};

struct ParsedArgs {
    url: Option<String>,
    token: Option<String>,
    profile: Option<String>,
    tasks: Option<String>,
    save: bool,
    dry_run: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "orbit".into());
    let mut url: Option<String> = None;
    let mut token: Option<String> = None;
    let mut profile: Option<String> = None;
    let mut tasks: Option<String> = None;
    let mut save = false; // --save
    let mut dry_run = false; // --dry-run

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(format!(
                    "Usage: {prog} [--token TOK|-k TOK] [--profile NAME|-P NAME] [--tasks FILE] [--save] [--dry-run] [ws://HOST:PORT/ws]"
                ));
            }
            "--token" | "-k" => {
                token = it.next();
            }
            "--profile" | "-P" => {
                profile = it.next();
            }
            "--tasks" => {
                tasks = it.next();
            }
            "--save" => {
                save = true;
            }
            "--dry-run" => {
                dry_run = true;
            }
            _ if arg.starts_with("--token=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        token = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with("--profile=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        profile = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with("--tasks=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        tasks = Some(v.to_string());
                    }
                }
            }
            _ => {
                if url.is_none() {
                    url = Some(arg);
                } else {
                    return Err(format!(
                        "Unexpected argument. Usage: {prog} [--token TOK|-k TOK] [--profile NAME|-P NAME] [--tasks FILE] [--save] [--dry-run] [ws://HOST:PORT/ws]"
                    ));
                }
            }
        }
    }
    Ok(ParsedArgs {
        url,
        token,
        profile,
        tasks,
        save,
        dry_run,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("orbit=info")),
        )
        .init();

    // Reuse the same parsing logic for testability
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        url: parsed.url.clone(),
        token: parsed.token.clone(),
    };
    let resolved = req.resolve(&profiles_file);

    // Determine final connection parameters (and maybe mutated profiles to persist)
    let mut profiles_mut = profiles_file.clone();
    let (url, token): (String, Option<String>) = match resolved {
        ResolveProfile::Direct(u, t) => {
            // Possibly save if profile specified and --save or new entry
            if let Some(name) = parsed.profile.as_ref() {
                let existing = profiles_mut.profiles.get(name);
                match existing {
                    None => {
                        // New profile: auto-save immediately
                        profiles_mut.profiles.insert(
                            name.clone(),
                            ProfileEntry {
                                url: u.clone(),
                                token: t.clone(),
                            },
                        );
                        let _ = save_profiles(&profiles_mut);
                    }
                    Some(entry) => {
                        let changed = entry.url != u || entry.token != t;
                        if changed {
                            let overwrite = if parsed.save {
                                true
                            } else {
                                prompt_yes_no(&format!(
                                    "Overwrite existing profile '{name}'? [y/N]: "
                                ))
                            };
                            if overwrite {
                                profiles_mut.profiles.insert(
                                    name.clone(),
                                    ProfileEntry {
                                        url: u.clone(),
                                        token: t.clone(),
                                    },
                                );
                                let _ = save_profiles(&profiles_mut);
                            }
                        }
                    }
                }
            }
            (u, t)
        }
        ResolveProfile::Loaded(u, t) => (u, t),
        ResolveProfile::PromptSelect(names) => {
            eprintln!("Select profile:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            eprint!("Enter number (or blank to abort): ");
            let _ = io::stderr().flush();
            let mut line = String::new();
            if io::stdin().read_line(&mut line).is_ok() {
                if let Ok(idx) = line.trim().parse::<usize>() {
                    if idx >= 1 && idx <= names.len() {
                        let name = &names[idx - 1];
                        if let Some(entry) = profiles_mut.profiles.get(name) {
                            (entry.url.clone(), entry.token.clone())
                        } else {
                            return Ok(());
                        }
                    } else {
                        return Ok(());
                    }
                } else {
                    return Ok(());
                }
            } else {
                return Ok(());
            }
        }
        ResolveProfile::PromptCreate(name) => {
            eprintln!("Profile '{name}' does not exist yet.");
            let url = prompt_string("Enter URL (ws://HOST:PORT/ws or wss://...): ")?;
            if url.trim().is_empty() {
                return Ok(());
            }
            let tok = prompt_string("Enter access token (or leave blank): ")?;
            let tok_opt = if tok.trim().is_empty() {
                None
            } else {
                Some(tok.trim().to_string())
            };
            profiles_mut.profiles.insert(
                name.clone(),
                ProfileEntry {
                    url: url.trim().to_string(),
                    token: tok_opt.clone(),
                },
            );
            let _ = save_profiles(&profiles_mut);
            (url.trim().to_string(), tok_opt)
        }
        ResolveProfile::None => {
            eprintln!("No URL provided and no profiles to select.");
            return Ok(());
        }
    };

    if parsed.dry_run {
        eprintln!("resolved endpoint {url}");
        return Ok(());
    }

    let endpoint = endpoint_with_token(&url, token.as_deref());
    run_client(&endpoint, parsed.tasks.as_deref()).await
}

fn prompt_yes_no(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

async fn run_client(endpoint: &str, tasks: Option<&str>) -> Result<()> {
    let client = TelemetryClient::spawn(ClientConfig::default());
    client.subscribe(Box::new(ConsoleObserver::new()));
    client.connect(endpoint)?;

    // Optional task checklist panel feed
    let mut task_rx = None;
    let mut _watcher = None;
    if let Some(path) = tasks {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        match TaskWatcher::spawn(Path::new(path), tx) {
            Ok(w) => {
                _watcher = Some(w);
                task_rx = Some(rx);
            }
            Err(e) => warn!("task watcher disabled: {e:#}"),
        }
    }

    // Stdin lines become outbound commands: `event_name {"key": "value"}`
    let mut lines = Some(BufReader::new(tokio::io::stdin()).lines());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = next_line(&mut lines) => match line {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_command_line(line) {
                        Some(command) => client.send(command),
                        None => eprintln!("usage: EVENT_NAME [{{\"key\": value, ...}}]"),
                    }
                }
                None => lines = None,
            },
            tasks = next_tasks(&mut task_rx) => match tasks {
                Some(list) => info!("{}", summarize_tasks(&list)),
                None => task_rx = None,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> Option<String> {
    match lines {
        Some(lines) => match lines.next_line().await {
            Ok(Some(line)) => Some(line),
            _ => None,
        },
        None => std::future::pending().await,
    }
}

async fn next_tasks(rx: &mut Option<UnboundedReceiver<Vec<Task>>>) -> Option<Vec<Task>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// `switch_ai_model {"model": "groq"}` -> command with payload; bare event
/// names get an empty payload.
fn parse_command_line(line: &str) -> Option<OutboundCommand> {
    let (event, rest) = match line.split_once(char::is_whitespace) {
        Some((event, rest)) => (event, rest.trim()),
        None => (line, ""),
    };
    if event.is_empty() {
        return None;
    }
    if rest.is_empty() {
        return Some(OutboundCommand::new(event));
    }
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(rest) {
        Ok(data) => Some(OutboundCommand {
            event: event.to_string(),
            data,
        }),
        Err(_) => None,
    }
}

fn summarize_tasks(tasks: &[Task]) -> String {
    let (mut pending, mut in_progress, mut completed) = (0, 0, 0);
    for task in tasks {
        match task.status {
            TaskStatus::Pending => pending += 1,
            TaskStatus::InProgress => in_progress += 1,
            TaskStatus::Completed => completed += 1,
        }
    }
    format!(
        "tasks: {pending} pending, {in_progress} in progress, {completed} completed ({} total)",
        tasks.len()
    )
}

/// Prints connection transitions and decoded events; keeps a rolling gauge
/// window the way a status panel would.
struct ConsoleObserver {
    history: GaugeHistory,
}

impl ConsoleObserver {
    fn new() -> Self {
        Self {
            history: GaugeHistory::new(SNAPSHOT_HISTORY),
        }
    }
}

impl TelemetryObserver for ConsoleObserver {
    fn on_connection_state(&mut self, state: ConnectionState) {
        info!("connection {state}");
    }

    fn on_event(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::SystemStats(s) => {
                let snap = TelemetrySnapshot::from_stats(s);
                self.history.record(&snap);
                info!(
                    "cpu {:5.1}%  ram {:5.1}%  net {}  (cpu avg {:4.1}%)",
                    snap.cpu,
                    snap.ram,
                    snap.network,
                    self.history.cpu_mean()
                );
            }
            InboundEvent::LogLine(l) => info!("[{}] {}", l.level, l.message),
            InboundEvent::DeviceUpdate(d) => {
                info!("device {} -> {}", d.id, d.status.as_deref().unwrap_or("updated"))
            }
            InboundEvent::ProjectUpdate(p) => info!("project {} {:.0}%", p.name, p.progress),
            InboundEvent::FileList(f) => info!("{} files under {}", f.files.len(), f.path),
            InboundEvent::BatchComplete(b) => {
                info!("batch {} complete", b.job.as_deref().unwrap_or("?"))
            }
            InboundEvent::VoiceTranscription(t) => info!("heard: {}", t.text),
            InboundEvent::CommandResult(r) => info!("{} result: {}", r.kind, r.payload),
            InboundEvent::AudioWaveform(w) => debug!("waveform frame ({} samples)", w.samples.len()),
        }
    }
}
