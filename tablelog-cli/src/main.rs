//! tablelog-cli: operator CLI for the Tablelog session server
//!
//! Talks to the server's HTTP API. Handy at the counter when the dashboard
//! is not open, and for scripting end-of-night cleanups.
//!
//! # Subcommands
//! - `start --customers <n> --service <name> --amount <yen> --duration <min>`
//! - `extend <id> <minutes>`
//! - `end <id> [--amount <yen>] [--cancel]`
//! - `list [--json]`
//! - `remind <action-id>`: apply a reminder quick action
//! - `status`: show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tablelog-cli", version, about = "Tablelog service-session CLI")]
struct Cli {
    /// Tablelog HTTP server URL (overrides TABLELOG_HTTP_URL env var)
    #[arg(long, env = "TABLELOG_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a timed service session
    Start {
        /// Number of guests at the table
        #[arg(short = 'c', long)]
        customers: i64,

        /// Service type label
        #[arg(short = 's', long)]
        service: String,

        /// Estimated amount in yen
        #[arg(short = 'a', long)]
        amount: i64,

        /// Planned duration in minutes
        #[arg(short = 'd', long)]
        duration: i64,
    },

    /// Extend an active session
    Extend {
        /// Session id
        id: String,

        /// Minutes to add
        minutes: i64,
    },

    /// End an active session
    End {
        /// Session id
        id: String,

        /// Actual amount charged; defaults to the estimate
        #[arg(short = 'a', long)]
        amount: Option<i64>,

        /// Record the session as cancelled instead of completed
        #[arg(long)]
        cancel: bool,
    },

    /// List active sessions
    List {
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Apply a reminder quick action (e.g. reminder_<id>_extend)
    Remind {
        action_id: String,
    },

    /// Show Tablelog server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One active session as returned by GET /api/services/active
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveService {
    pub id: String,
    pub customer_count: u32,
    pub service: String,
    pub estimated_amount: u64,
    pub duration: i64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub struct ActiveResponse {
    pub services: Vec<ActiveService>,
    pub count: usize,
}

// ============================================================================
// Formatting
// ============================================================================

/// `HH:MM` out of an RFC 3339 timestamp; the raw string if it is too short.
pub fn clock_time(rfc3339: &str) -> &str {
    rfc3339.get(11..16).unwrap_or(rfc3339)
}

/// One table row for `list`.
pub fn format_service_line(s: &ActiveService) -> String {
    format!(
        "{:<15} {:<20} {:>2} guests {:>4}min {:>8} yen  {}-{}",
        s.id,
        s.service,
        s.customer_count,
        s.duration,
        s.estimated_amount,
        clock_time(&s.start_time),
        clock_time(&s.end_time),
    )
}

/// Pull the `error` field out of a `{success:false, error}` body.
pub fn error_message(body: &serde_json::Value) -> String {
    body["error"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?)
}

/// POST a JSON body and return the decoded response, exiting on failure.
fn post(server: &str, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let url = format!("{}{}", server, path);
    let resp = match client()?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tablelog-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        eprintln!("tablelog-cli: server returned {}: {}", status, error_message(&body));
        std::process::exit(1);
    }
    Ok(body)
}

fn do_start(server: &str, customers: i64, service: &str, amount: i64, duration: i64) -> anyhow::Result<()> {
    let body = post(
        server,
        "/api/service/start",
        serde_json::json!({
            "customerCount": customers,
            "service": service,
            "estimatedAmount": amount,
            "duration": duration,
            "origin": {"source": "cli"},
        }),
    )?;
    let log = &body["serviceLog"];
    println!("Started {}", body["serviceId"].as_str().unwrap_or("?"));
    println!(
        "Ends at {}",
        clock_time(log["endTime"].as_str().unwrap_or("?"))
    );
    Ok(())
}

fn do_extend(server: &str, id: &str, minutes: i64) -> anyhow::Result<()> {
    let body = post(
        server,
        "/api/service/extend",
        serde_json::json!({"serviceId": id, "extensionTime": minutes}),
    )?;
    println!(
        "Extended {} by {}min, now ends at {}",
        id,
        minutes,
        clock_time(body["newEndTime"].as_str().unwrap_or("?"))
    );
    Ok(())
}

fn do_end(server: &str, id: &str, amount: Option<i64>, cancel: bool) -> anyhow::Result<()> {
    let mut req = serde_json::json!({"serviceId": id});
    if let Some(amount) = amount {
        req["actualAmount"] = amount.into();
    }
    if cancel {
        req["status"] = "cancelled".into();
    }
    let body = post(server, "/api/service/end", req)?;
    println!("{}", body["boardMessage"]["message"].as_str().unwrap_or("ended"));
    Ok(())
}

fn do_remind(server: &str, action_id: &str) -> anyhow::Result<()> {
    let body = post(
        server,
        "/api/service/reminder",
        serde_json::json!({"actionId": action_id}),
    )?;
    let result = &body["result"];
    match result["outcome"].as_str() {
        Some("extended") => println!(
            "Extended by {}min, now ends at {}",
            result["extensionTime"],
            clock_time(result["newEndTime"].as_str().unwrap_or("?"))
        ),
        Some("ended") => println!(
            "{}",
            result["boardMessage"]["message"].as_str().unwrap_or("ended")
        ),
        _ => println!("{}", result),
    }
    Ok(())
}

fn do_list(server: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/services/active", server);
    let resp = match client()?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("tablelog-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        eprintln!("tablelog-cli: server returned {}", status);
        std::process::exit(1);
    }

    let body: serde_json::Value = resp.json()?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let active: ActiveResponse = serde_json::from_value(body)?;
    if active.count == 0 {
        eprintln!("No active sessions");
        return Ok(());
    }
    for s in &active.services {
        println!("{}", format_service_line(s));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client()?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Tablelog server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!("Active services: {}", body["activeServices"]);
            println!("Scanner:         {}", body["scanner"].as_str().unwrap_or("?"));
            println!("Notifier:        {}", body["notifier"].as_str().unwrap_or("?"));
            println!("Uptime:          {}s", body["uptimeSeconds"]);
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("tablelog-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("tablelog-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Start {
            customers,
            service,
            amount,
            duration,
        } => do_start(&server, customers, &service, amount, duration),
        Commands::Extend { id, minutes } => do_extend(&server, &id, minutes),
        Commands::End { id, amount, cancel } => do_end(&server, &id, amount, cancel),
        Commands::List { json } => do_list(&server, json),
        Commands::Remind { action_id } => do_remind(&server, &action_id),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("tablelog-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, service: &str) -> ActiveService {
        ActiveService {
            id: id.to_string(),
            customer_count: 4,
            service: service.to_string(),
            estimated_amount: 16000,
            duration: 90,
            start_time: "2026-09-12T22:00:00Z".to_string(),
            end_time: "2026-09-12T23:30:00Z".to_string(),
        }
    }

    #[test]
    fn test_clock_time_extracts_hours_minutes() {
        assert_eq!(clock_time("2026-09-12T22:05:31.120Z"), "22:05");
        assert_eq!(clock_time("short"), "short");
    }

    #[test]
    fn test_service_line_has_fields_and_window() {
        let line = format_service_line(&service("1757714400000", "all-you-can-drink"));
        assert!(line.starts_with("1757714400000"));
        assert!(line.contains("all-you-can-drink"));
        assert!(line.contains(" 4 guests"));
        assert!(line.contains("16000 yen"));
        assert!(line.ends_with("22:00-23:30"));
    }

    #[test]
    fn test_active_response_parses_server_json() {
        let body = serde_json::json!({
            "success": true,
            "count": 1,
            "services": [{
                "id": "1757714400000",
                "customerCount": 2,
                "service": "set",
                "estimatedAmount": 5000,
                "duration": 60,
                "startTime": "2026-09-12T22:00:00Z",
                "endTime": "2026-09-12T23:00:00Z",
                "status": "active",
                "reminderSent": false
            }]
        });
        let parsed: ActiveResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.count, 1);
        assert_eq!(parsed.services[0].service, "set");
        assert_eq!(parsed.services[0].duration, 60);
    }

    #[test]
    fn test_error_message_prefers_error_field() {
        let body = serde_json::json!({"success": false, "error": "service not found: 42"});
        assert_eq!(error_message(&body), "service not found: 42");

        let odd = serde_json::json!({"detail": "x"});
        assert_eq!(error_message(&odd), r#"{"detail":"x"}"#);
    }

    #[test]
    fn test_cli_parses_end_with_cancel() {
        let cli = Cli::try_parse_from(["tablelog-cli", "end", "42", "--amount", "0", "--cancel"]).unwrap();
        match cli.command {
            Commands::End { id, amount, cancel } => {
                assert_eq!(id, "42");
                assert_eq!(amount, Some(0));
                assert!(cancel);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
