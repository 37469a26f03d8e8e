//! Host agent session loopback binary.
//!
//! # Usage
//!
//! ```bash
//! # Exchange 16 messages each way with default settings
//! hostagent-session
//!
//! # Bind a random challenge and push larger payloads
//! hostagent-session --use-challenge --messages 100 --payload-size 65536
//! ```

use clap::Parser;
use hostagent_session::{LoopbackConfig, run_loopback};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Session crypto loopback check
#[derive(Parser, Debug)]
#[command(name = "hostagent-session")]
#[command(about = "Establish a local agent/client session and verify encrypted traffic")]
#[command(version)]
struct Args {
    /// Session identifier bound into the key context
    #[arg(long, default_value = "loopback-session")]
    session_id: String,

    /// Target identifier bound into the key context
    #[arg(long, default_value = "i-loopback")]
    target_id: String,

    /// Messages sent in each direction
    #[arg(short, long, default_value = "16")]
    messages: usize,

    /// Payload size in bytes
    #[arg(short, long, default_value = "1024")]
    payload_size: usize,

    /// Bind a random challenge into the key context
    #[arg(long)]
    use_challenge: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(session_id = %args.session_id, target_id = %args.target_id, "loopback starting");

    let config = LoopbackConfig {
        session_id: args.session_id,
        target_id: args.target_id,
        messages: args.messages,
        payload_size: args.payload_size,
        use_random_challenge: args.use_challenge,
        ..LoopbackConfig::default()
    };

    let report = run_loopback(&config).await?;

    tracing::info!(
        messages = report.messages_verified,
        plaintext_bytes = report.plaintext_bytes,
        envelope_bytes = report.envelope_bytes,
        kms_unwraps = report.kms_unwraps,
        challenge = report.random_challenge.is_some(),
        "loopback complete"
    );

    Ok(())
}
