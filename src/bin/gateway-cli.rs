use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use llm_gateway::lifecycle::startup::check_config;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for llm-gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Admin API key; defaults to $GATEWAY_ADMIN_KEY
    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gateway status and request counters
    Status,
    /// List backends with health and in-flight requests
    Backends,
    /// Ask the gateway to reload its configuration file
    Reload,
    /// Validate a configuration file locally
    Check { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Check { file } = &cli.command {
        match check_config(file) {
            Ok(snapshot) => println!(
                "{}: OK ({} listeners, {} backends)",
                file.display(),
                snapshot.config.listeners.len(),
                snapshot.backends.len()
            ),
            Err(e) => {
                eprintln!("{}: {}", file.display(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Backends => client.get(format!("{}/admin/backends", cli.url)),
        Commands::Reload => client.post(format!("{}/admin/reload", cli.url)),
        Commands::Check { .. } => return Ok(()),
    };
    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let rendered = match serde_json::from_str::<Value>(&text) {
        Ok(json) => serde_json::to_string_pretty(&json)?,
        Err(_) => text,
    };

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !rendered.is_empty() {
            eprintln!("{}", rendered);
        }
        std::process::exit(1);
    }

    println!("{}", rendered);
    Ok(())
}
