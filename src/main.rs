//! llm-gateway
//!
//! A gateway that routes LLM API traffic to OpenAI, Anthropic and MCP
//! backends, translating between the two chat dialects where routes ask for it.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                     LLM GATEWAY                      │
//!                        │                                                      │
//!   Client Request       │  ┌─────────┐   ┌──────────┐   ┌─────────────────┐    │
//!   ─────────────────────┼─▶│   net   │──▶│   http   │──▶│ routing + load  │    │
//!                        │  │listeners│   │front door│   │    balancer     │    │
//!                        │  └─────────┘   └──────────┘   └────────┬────────┘    │
//!                        │                                        ▼             │
//!                        │                 ┌───────────┐   ┌─────────────┐      │
//!   Client Response      │                 │ translate │◀─▶│  dispatch   │◀─────┼──── Backend
//!   ◀────────────────────┼─────────────────│ (dialect) │   │ (streaming) │      │
//!                        │                 └───────────┘   └─────────────┘      │
//!                        │                                                      │
//!                        │  config (snapshot + reload) · health · observability │
//!                        │  resilience · security · lifecycle · admin           │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use llm_gateway::lifecycle::startup::check_config;

#[derive(Parser)]
#[command(name = "llm-gateway", version)]
#[command(about = "Routing and protocol-translating gateway for LLM APIs", long_about = None)]
struct Args {
    /// Configuration file (YAML, JSON or TOML)
    #[arg(short, long, default_value = "gateway.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.check {
        return match check_config(&args.config) {
            Ok(snapshot) => {
                println!(
                    "{}: OK ({} listeners, {} backends)",
                    args.config.display(),
                    snapshot.config.listeners.len(),
                    snapshot.backends.len()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", args.config.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    match llm_gateway::lifecycle::run(&args.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("llm-gateway: {}", e);
            ExitCode::FAILURE
        }
    }
}
