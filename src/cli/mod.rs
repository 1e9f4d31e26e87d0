//! `clap`-derived CLI: `serve` runs the engine; the other subcommands are
//! ad hoc task administration against a running instance's HTTP surface
//! (§2 "CLI"), mirroring the teacher's `clap`-based `main.rs` entrypoint
//! without its actix/futures-0.1 plumbing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::types::TaskId;

#[derive(Debug, Parser)]
#[command(name = "harvestd", about = "Durable, resumable, rate-limited data-fetching task engine")]
pub struct Cli {
    /// Path to an INI config file (defaults per `config::Config::load`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the server: loads config, reconciles crashed tasks, binds the
    /// HTTP control plane.
    Serve,

    /// Creates a task and optionally seeds it with inputs from a JSON file.
    CreateTask {
        data_source: String,
        task_type: String,
        #[arg(long)]
        params: Option<String>,
        #[arg(long)]
        inputs: Option<PathBuf>,
        #[arg(long)]
        s3_prefix: Option<String>,
        #[arg(long, default_value = "http://127.0.0.1:9029")]
        server: String,
    },

    /// Lists tasks known to a running instance.
    ListTasks {
        #[arg(long, default_value = "http://127.0.0.1:9029")]
        server: String,
    },

    /// Requests execution of a paused/errored task.
    Execute {
        id: TaskId,
        #[arg(long, default_value = "http://127.0.0.1:9029")]
        server: String,
    },

    /// Requests a running task pause at the next observed checkpoint.
    Pause {
        id: TaskId,
        #[arg(long, default_value = "http://127.0.0.1:9029")]
        server: String,
    },
}

pub async fn run_admin_command(command: Command) -> anyhow::Result<()> {
    let http = reqwest::Client::new();

    match command {
        Command::Serve => unreachable!("Serve is handled by main() directly"),

        Command::CreateTask {
            data_source,
            task_type,
            params,
            inputs,
            s3_prefix,
            server,
        } => {
            let params: Option<Value> = params.map(|p| serde_json::from_str(&p)).transpose()?;
            let inputs: Vec<Value> = match inputs {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => Vec::new(),
            };
            let body = serde_json::json!({
                "data_source": data_source,
                "task_type": task_type,
                "params": params,
                "inputs": inputs,
                "s3_prefix": s3_prefix,
            });
            let response = http.post(format!("{server}/tasks")).json(&body).send().await?;
            print_response(response).await?;
        }

        Command::ListTasks { server } => {
            let response = http.get(format!("{server}/tasks")).send().await?;
            print_response(response).await?;
        }

        Command::Execute { id, server } => {
            let response = http.post(format!("{server}/tasks/{id}/execute")).send().await?;
            print_response(response).await?;
        }

        Command::Pause { id, server } => {
            let response = http.post(format!("{server}/tasks/{id}/pause")).send().await?;
            print_response(response).await?;
        }
    }

    Ok(())
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    println!("{status}: {}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
