//! # nbtext - Notebooks as Text
//!
//! The command line binary for the nbtext converter.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │              apps/nbtext (THE BINARY)          │
//! │                                                │
//! │   ┌──────────────┐        ┌────────────────┐   │
//! │   │     CLI      │ ─────▶ │  nbtext-core   │   │
//! │   │    (clap)    │        │ (THE CONVERTER)│   │
//! │   └──────────────┘        └────────────────┘   │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Convert a notebook to a percent script
//! nbtext notebook.ipynb --to py:percent
//!
//! # Pair a notebook with a Markdown file, then keep both in sync
//! nbtext notebook.ipynb --set-formats ipynb,md
//! nbtext notebook.md --sync
//!
//! # Test the round trip through the light format
//! nbtext notebook.ipynb --to py:light --test
//! ```

use clap::Parser;
use nbtext::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // NBTEXT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("NBTEXT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nbtext=info,nbtext_core=warn".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    let cli = cli::Cli::parse();

    match cli::execute(cli) {
        Ok(0) => {}
        // Number of notebooks that failed the round trip test
        Ok(failures) => std::process::exit(i32::try_from(failures).unwrap_or(i32::MAX)),
        Err(e) => {
            tracing::error!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
