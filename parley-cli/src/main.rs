//! parley-cli: operator CLI for a running Parley server
//!
//! Talks to the HTTP API only; it never touches the database or the bridge.
//!
//! # Subcommands
//! - `health`: database and pgvector status
//! - `status`: current session status and pairing state
//! - `search <query> [-n <limit>] [--json]`: knowledge retrieval for the bound account

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const DEFAULT_LIMIT: usize = 5;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "parley-cli", version, about = "Operator CLI for the Parley HTTP API")]
struct Cli {
    /// Parley HTTP server URL (overrides PARLEY_HTTP_URL env var)
    #[arg(long, env = "PARLEY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show database and pgvector health
    Health,

    /// Show the session status of the bound account
    Status,

    /// Search the knowledge base the way the reply path does
    Search {
        /// Query text to search for
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Print the raw results as a JSON array
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

/// One ranked chunk from POST /search
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub query: String,
    pub count: usize,
    pub took_ms: Option<u64>,
}

/// Snapshot from GET /status
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub account_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub connected: bool,
    pub pairing_image: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: Option<String>,
}

// ============================================================================
// Formatting
// ============================================================================

/// Human-readable block for one hit: header, score, and a 200-char preview.
pub fn format_hit(rank: usize, hit: &SearchHit) -> String {
    let preview: String = hit.text.chars().take(200).collect();
    let ellipsis = if hit.text.chars().count() > 200 { "…" } else { "" };
    format!(
        "[{}] {} (chunk {})\nScore:  {:.0}%\n\n{}{}\n",
        rank,
        hit.title,
        hit.index,
        hit.score * 100.0,
        preview,
        ellipsis
    )
}

pub fn format_status(status: &StatusResponse) -> Vec<String> {
    let mut lines = vec![
        format!("Account:    {}", status.account_id.as_deref().unwrap_or("?")),
        format!("Status:     {}", status.status),
        format!("Connected:  {}", if status.connected { "yes" } else { "no" }),
    ];
    if let Some(ts) = &status.updated_at {
        lines.push(format!("Updated:    {}", ts));
    }
    if let Some(err) = &status.last_error {
        lines.push(format!("Last error: {}", err));
    }
    // The image itself is a data URI; only say it exists.
    if status.pairing_image.is_some() {
        lines.push("Pairing:    QR code available (scan it from the server log)".to_string());
    }
    lines
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn do_search(server: &str, query: &str, limit: usize, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/search", server);
    let body = serde_json::json!({
        "query": query,
        "limit": limit,
    });

    let resp = match client(30)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("parley-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("parley-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let search_resp: SearchResponse = match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("parley-cli: failed to parse search response: {}", e);
            std::process::exit(1);
        }
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&search_resp.results)?);
        return Ok(());
    }

    if search_resp.results.is_empty() {
        eprintln!("No results found for: {}", search_resp.query);
        return Ok(());
    }
    for (i, hit) in search_resp.results.iter().enumerate() {
        println!("{}", format_hit(i + 1, hit));
    }
    if let Some(ms) = search_resp.took_ms {
        eprintln!("{} result(s) in {} ms", search_resp.count, ms);
    }
    Ok(())
}

fn do_health(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);

    match client(10)?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Parley server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:    {}", body["postgresql"].as_str().unwrap_or("?"));
            println!("pgvector:      {}", body["pgvector"].as_str().unwrap_or("?"));
            println!("Bridge socket: {}", body["bridge_socket"].as_str().unwrap_or("?"));
            if let Some(missing) = body["missing_tables"].as_array().filter(|m| !m.is_empty()) {
                let names: Vec<&str> = missing.iter().filter_map(|t| t.as_str()).collect();
                println!("Missing tables: {}", names.join(", "));
            }
        }
        Ok(r) => {
            eprintln!("parley-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("parley-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", server);

    let resp = match client(10)?.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("parley-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };
    if !resp.status().is_success() {
        eprintln!("parley-cli: server returned {}", resp.status());
        std::process::exit(1);
    }

    let status: StatusResponse = resp.json()?;
    for line in format_status(&status) {
        println!("{}", line);
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
        Commands::Health => do_health(&server),
        Commands::Status => do_status(&server),
        Commands::Search { query, limit, json } => do_search(&server, &query, limit, json),
    };

    if let Err(e) = result {
        eprintln!("parley-cli: {}", e);
        std::process::exit(1);
    }
}
