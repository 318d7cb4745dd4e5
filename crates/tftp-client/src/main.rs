//! TFTP client - main executable.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use tftp::{ClientConfig, Direction, SessionConfig, TransferMode, run_client};

#[derive(FromArgs, Debug)]
#[argh(
    description = "TFTP client (RFC 1350)",
    example = "Fetch a remote file:\n  {command_name} 10.0.0.2 get remote.bin local.bin",
    example = "Upload a text file with line-ending translation:\n  {command_name} --mode netascii 10.0.0.2 put notes.txt notes.txt"
)]
struct CliArgs {
    #[argh(
        option,
        description = "server port the request is sent to",
        default = "tftp::DEFAULT_SERVER_PORT"
    )]
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

    #[argh(
        option,
        description = "transfer mode: netascii or octet",
        default = "TransferMode::Octet"
    )]
    mode: TransferMode,

    #[argh(switch, description = "include error text in outgoing ERROR packets")]
    enable_error_message_delivery: bool,

    #[argh(switch, description = "silence per-block progress messages")]
    disable_block_messages: bool,

    #[argh(positional, description = "server hostname or address")]
    host: String,

    #[argh(positional, description = "request type: get or put")]
    command: Direction,

    #[argh(positional, description = "source file (remote for get, local for put)")]
    source: String,

    #[argh(positional, description = "destination file (local for get, remote for put)")]
    destination: String,
}

impl CliArgs {
    fn into_client_config(self) -> ClientConfig {
        ClientConfig {
            host: self.host,
            port: self.port,
            direction: self.command,
            source: self.source,
            destination: self.destination,
            mode: self.mode,
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
    let what = format!("{} of '{}'", args.command, args.source);

    run_client(args.into_client_config())
        .await
        .with_context(|| format!("TFTP {what} failed"))
}
