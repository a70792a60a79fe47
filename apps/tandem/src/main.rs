//! # Tandem - Multi-Modal Recording Server
//!
//! The main binary aligning a wearable sensor, a gaze tracker and a
//! microphone into one sequence of recording sessions.
//!
//! This application provides:
//! - HTTP ingestion server (axum-based) for pushed gaze and audio uploads
//! - Inlet host pulling discovered sensor streams
//! - Experiment coordinator for supervised runs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      apps/tandem (THE BINARY)                   │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐     │
//! │  │  Ingestion  │    │ Inlet Host  │    │   Coordinator    │     │
//! │  │   (axum)    │    │  (tick)     │    │  (state machine) │     │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘     │
//! │         │                  │                    │               │
//! │         └──────────────────┼────────────────────┘               │
//! │                            ▼                                    │
//! │                    ┌───────────────┐                            │
//! │                    │  tandem-core  │                            │
//! │                    │ (THE LOGIC)   │                            │
//! │                    └───────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Push side only
//! tandem serve --port 3000
//!
//! # Push and pull side, one supervised 60 s run against the simulator
//! tandem run --simulate --supervise --record-ms 60000
//!
//! # Talk to a running server
//! tandem session start --lead-ms 1500
//! ```

use clap::Parser;
use tandem::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // TANDEM_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TANDEM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tandem=info,tandem_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Tandem startup banner.
fn print_banner() {
    println!(
        r#"
  ┌┬┐┌─┐┌┐┌┌┬┐┌─┐┌┬┐
   │ ├─┤│││ ││├┤ │││
   ┴ ┴ ┴┘└┘─┴┘└─┘┴ ┴

  Multi-Modal Recording Server v{}

  Heart rate • Gaze • Audio
"#,
        env!("CARGO_PKG_VERSION")
    );
}
