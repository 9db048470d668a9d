//! starfailctl — a thin RPC client over the `starfail` daemon namespace.
//!
//! Exit codes: `0` success, `2` invalid args, `3` RPC unavailable,
//! `4` remote error (the daemon's `{error, code}` envelope).

use clap::Subcommand;
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Summarize daemon state and the active member.
    Status,
    /// List known members.
    Members,
    /// Show latest metrics, optionally for one member.
    Metrics { member: Option<String> },
    /// Show metric/score history for one member.
    History {
        member: String,
        #[arg(long)]
        hours: Option<u64>,
    },
    /// List recent events, optionally filtered by type.
    Events {
        #[arg(long = "type")]
        event_type: Option<String>,
    },
    /// Force failover to the named member.
    Failover { member: String },
    /// Clear a manual failover override.
    Restore,
    /// Force an immediate tick.
    Recheck,
    /// Change the runtime log level.
    Setlog { level: String },
    /// Print daemon build/runtime info.
    Info,
}

pub const EXIT_INVALID_ARGS: i32 = 2;
pub const EXIT_RPC_UNAVAILABLE: i32 = 3;
pub const EXIT_REMOTE_ERROR: i32 = 4;

pub async fn run(client: &reqwest::Client, base: &str, cmd: Cmd) -> i32 {
    let result = match cmd {
        Cmd::Status => get(client, base, "/status", &[]).await,
        Cmd::Members => get(client, base, "/members", &[]).await,
        Cmd::Metrics { member } => {
            let query: Vec<(&str, String)> = member.map(|m| vec![("member", m)]).unwrap_or_default();
            get(client, base, "/metrics", &query).await
        }
        Cmd::History { member, hours } => {
            let mut query = vec![("member", member)];
            if let Some(h) = hours {
                query.push(("hours", h.to_string()));
            }
            get(client, base, "/history", &query).await
        }
        Cmd::Events { event_type } => {
            let query: Vec<(&str, String)> = event_type.map(|t| vec![("type", t)]).unwrap_or_default();
            get(client, base, "/events", &query).await
        }
        Cmd::Failover { member } => {
            if member.is_empty() {
                return EXIT_INVALID_ARGS;
            }
            post(client, base, "/failover", &FailoverBody { member, reason: None }).await
        }
        Cmd::Restore => post(client, base, "/restore", &()).await,
        Cmd::Recheck => post(client, base, "/recheck", &()).await,
        Cmd::Setlog { level } => post(client, base, "/setlog", &SetLogBody { level }).await,
        Cmd::Info => get(client, base, "/info", &[]).await,
    };

    match result {
        Ok(body) => {
            println!("{body}");
            0
        }
        Err(CliError::Transport(e)) => {
            eprintln!("error: rpc unavailable: {e}");
            EXIT_RPC_UNAVAILABLE
        }
        Err(CliError::Remote { error, code }) => {
            eprintln!("error[{code}]: {error}");
            EXIT_REMOTE_ERROR
        }
    }
}

#[derive(Serialize)]
struct FailoverBody {
    member: String,
    reason: Option<String>,
}

#[derive(Serialize)]
struct SetLogBody {
    level: String,
}

enum CliError {
    Transport(String),
    Remote { error: String, code: u16 },
}

async fn get(client: &reqwest::Client, base: &str, path: &str, query: &[(&str, String)]) -> Result<String, CliError> {
    let resp = client
        .get(format!("{base}{path}"))
        .query(query)
        .send()
        .await
        .map_err(|e| CliError::Transport(e.to_string()))?;
    handle_response(resp).await
}

async fn post<B: Serialize>(client: &reqwest::Client, base: &str, path: &str, body: &B) -> Result<String, CliError> {
    let resp = client
        .post(format!("{base}{path}"))
        .json(body)
        .send()
        .await
        .map_err(|e| CliError::Transport(e.to_string()))?;
    handle_response(resp).await
}

async fn handle_response(resp: reqwest::Response) -> Result<String, CliError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|e| CliError::Transport(e.to_string()))?;
    if status.is_success() {
        return Ok(pretty(&text));
    }
    #[derive(serde::Deserialize)]
    struct Envelope {
        error: String,
        code: u16,
    }
    match serde_json::from_str::<Envelope>(&text) {
        Ok(e) => Err(CliError::Remote { error: e.error, code: e.code }),
        Err(_) => Err(CliError::Remote { error: text, code: status.as_u16() }),
    }
}

fn pretty(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(v) => serde_json::to_string_pretty(&v).unwrap_or_else(|_| text.to_string()),
        Err(_) => text.to_string(),
    }
}
