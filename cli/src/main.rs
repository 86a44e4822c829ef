//! phpeek-pm: thin CLI over the manager's HTTP control plane
//!
//! Exit codes: 0 success, 2 usage error, 3 not found, 4 conflict,
//! 5 dependency error, 1 anything else.

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::process::ExitCode;
use tabwriter::TabWriter;

#[derive(Parser)]
#[command(name = "phpeek-pm", about = "Control a running phpeek-pm daemon")]
struct Cli {
    /// Base URL of the manager's control plane
    #[arg(long, default_value = "http://127.0.0.1:9180", env = "PHPEEK_PM_ADDR")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a process
    Start { name: String },
    /// Stop a process
    Stop { name: String },
    /// Restart a process
    Restart { name: String },
    /// Set the desired instance count of a process
    Scale { name: String, desired: u32 },
    /// List all processes
    List,
    /// Show recent log lines of a process
    Logs {
        name: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Add a process from a JSON definition (file path or '-' for stdin)
    Add { definition: String },
    /// Delete a process
    Delete { name: String },
    /// Reload the configuration from disk
    Reload,
    /// Save the running configuration to disk
    Save,
}

enum CliError {
    /// HTTP-level error carrying the decoded control-plane error body
    Api { kind: String, message: String },
    /// Everything else: connection refused, bad JSON, io
    Other(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Api { kind, .. } => match kind.as_str() {
                "not_found" => ExitCode::from(3),
                "already_exists" | "state_conflict" => ExitCode::from(4),
                "dependency_missing" | "dependency_cycle" => ExitCode::from(5),
                _ => ExitCode::from(1),
            },
            Self::Other(_) => ExitCode::from(1),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Other(message) => message.clone(),
        }
    }
}

fn decode_error(err: ureq::Error) -> CliError {
    match err {
        ureq::Error::Status(_, response) => {
            let body: Value = response
                .into_json()
                .unwrap_or_else(|_| json!({ "kind": "internal", "message": "unreadable error" }));
            CliError::Api {
                kind: body["kind"].as_str().unwrap_or("internal").to_string(),
                message: body["message"].as_str().unwrap_or("unknown error").to_string(),
            }
        }
        other => CliError::Other(format!("cannot reach the manager: {}", other)),
    }
}

fn get(addr: &str, path: &str) -> Result<Value, CliError> {
    ureq::get(&format!("{}{}", addr, path))
        .call()
        .map_err(decode_error)?
        .into_json()
        .map_err(|e| CliError::Other(format!("bad response: {}", e)))
}

fn post(addr: &str, path: &str, body: Option<Value>) -> Result<Value, CliError> {
    let request = ureq::post(&format!("{}{}", addr, path));
    let response = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    }
    .map_err(decode_error)?;
    response
        .into_json()
        .map_err(|e| CliError::Other(format!("bad response: {}", e)))
}

fn run(cli: Cli) -> Result<(), CliError> {
    let addr = cli.addr.trim_end_matches('/');
    match cli.command {
        Command::Start { name } => {
            post(addr, &format!("/api/v1/processes/{}/start", name), None)?;
            println!("{} started", name);
        }
        Command::Stop { name } => {
            post(addr, &format!("/api/v1/processes/{}/stop", name), None)?;
            println!("{} stopped", name);
        }
        Command::Restart { name } => {
            post(addr, &format!("/api/v1/processes/{}/restart", name), None)?;
            println!("{} restarted", name);
        }
        Command::Scale { name, desired } => {
            let body = post(
                addr,
                &format!("/api/v1/processes/{}/scale", name),
                Some(json!({ "desired": desired })),
            )?;
            println!("{} scaled to {}", name, body["desired_scale"]);
        }
        Command::List => {
            let processes = get(addr, "/api/v1/processes")?;
            print_process_table(processes.as_array().unwrap_or(&Vec::new()))
                .map_err(|e| CliError::Other(e.to_string()))?;
        }
        Command::Logs { name, limit } => {
            let lines = get(addr, &format!("/api/v1/processes/{}/logs?limit={}", name, limit))?;
            for line in lines.as_array().unwrap_or(&Vec::new()) {
                let stream = line["stream"].as_str().unwrap_or("?");
                let text = line["line"].as_str().unwrap_or("");
                let instance = line["instance_id"].as_str().unwrap_or("?");
                if stream == "stderr" {
                    eprintln!("{} {}", format!("[{}]", instance).red(), text);
                } else {
                    println!("{} {}", format!("[{}]", instance).dimmed(), text);
                }
            }
        }
        Command::Add { definition } => {
            let content = if definition == "-" {
                let mut buffer = String::new();
                std::io::stdin()
                    .read_to_string(&mut buffer)
                    .map_err(|e| CliError::Other(format!("cannot read stdin: {}", e)))?;
                buffer
            } else {
                std::fs::read_to_string(&definition)
                    .map_err(|e| CliError::Other(format!("cannot read {}: {}", definition, e)))?
            };
            let def: Value = serde_json::from_str(&content)
                .map_err(|e| CliError::Other(format!("invalid definition: {}", e)))?;
            let body = post(addr, "/api/v1/processes", Some(def))?;
            println!("{} added", body["name"].as_str().unwrap_or("process"));
        }
        Command::Delete { name } => {
            let response = ureq::delete(&format!("{}/api/v1/processes/{}", addr, name))
                .call()
                .map_err(decode_error)?;
            let _ = response.into_string();
            println!("{} deleted", name);
        }
        Command::Reload => {
            post(addr, "/api/v1/config/reload", None)?;
            println!("configuration reloaded");
        }
        Command::Save => {
            post(addr, "/api/v1/config/save", None)?;
            println!("configuration saved");
        }
    }
    Ok(())
}

fn colored_state(state: &str) -> colored::ColoredString {
    match state {
        "running" => state.green(),
        "degraded" | "starting" | "stopping" => state.yellow(),
        "failed" => state.red(),
        "completed" => state.blue(),
        _ => state.dimmed(),
    }
}

fn print_process_table(processes: &[Value]) -> std::io::Result<()> {
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "NAME\tSTATE\tSCALE\tINSTANCES\tRESTARTS\tSTARTED")?;
    for process in processes {
        let name = process["name"].as_str().unwrap_or("?");
        let state = process["state"].as_str().unwrap_or("?");
        let desired = process["desired_scale"].as_u64().unwrap_or(0);
        let instances = process["instances"].as_array().cloned().unwrap_or_default();
        let live = instances
            .iter()
            .filter(|i| {
                matches!(
                    i["state"].as_str(),
                    Some("starting") | Some("running") | Some("stopping")
                )
            })
            .count();
        let restarts: u64 = instances
            .iter()
            .map(|i| i["restart_count"].as_u64().unwrap_or(0))
            .sum();
        let started = instances
            .iter()
            .filter_map(|i| i["started_at"].as_i64())
            .min()
            .and_then(|secs| Local.timestamp_opt(secs, 0).single())
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            tw,
            "{}\t{}\t{}/{}\t{}\t{}\t{}",
            name,
            colored_state(state),
            live,
            desired,
            instances.len(),
            restarts,
            started
        )?;
    }
    tw.flush()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err.message());
            err.exit_code()
        }
    }
}
