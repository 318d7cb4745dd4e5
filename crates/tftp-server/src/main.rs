//! TFTP server - main executable.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::{ServerConfig, SessionConfig, run_server};

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP server (RFC 1350)",
    example = "Serve on the well-known port (requires privileges):\n  {command_name}",
    example = "Serve on an unprivileged port with a short timeout:\n  {command_name} --port 6969 --timeout 1000"
)]
struct CliArgs {
    #[argh(option, description = "port to listen on", default = "tftp::DEFAULT_SERVER_PORT")]
    port: u16,

    #[argh(
        option,
        description = "receive timeout in milliseconds",
        default = "tftp::DEFAULT_TIMEOUT_MS"
    )]
    timeout: u64,

    #[argh(
        option,
        description = "maximum attempts per operation",
        default = "tftp::DEFAULT_MAX_ATTEMPTS"
    )]
    attempts: u32,

    #[argh(switch, description = "include error text in outgoing ERROR packets")]
    enable_error_message_delivery: bool,

    #[argh(switch, description = "silence per-block progress messages")]
    disable_block_messages: bool,
}

impl CliArgs {
    fn into_server_config(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            session: SessionConfig {
                timeout: Duration::from_millis(self.timeout),
                max_attempts: self.attempts,
                error_message_delivery: self.enable_error_message_delivery,
                disable_block_messages: self.disable_block_messages,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: CliArgs = argh::from_env();
    let port = args.port;

    run_server(args.into_server_config())
        .await
        .with_context(|| format!("TFTP server failed on port {port}"))
}
