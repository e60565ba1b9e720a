use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use irisrpc_client::{Client, ClientConfig};
use irisrpc_frame::FrameFormat;
use tracing::info;

use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, INTERRUPTED, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod list;
pub mod ping;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ping an instance and report round-trip latency.
    Ping(PingArgs),
    /// Call a function and print its result.
    Call(CallArgs),
    /// List instances registered with the target.
    List(ListArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ping(args) => ping::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::List(args) => list::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum MessageFormat {
    U64json,
    Json,
}

impl From<MessageFormat> for FrameFormat {
    fn from(format: MessageFormat) -> Self {
        match format {
            MessageFormat::U64json => FrameFormat::U64Json,
            MessageFormat::Json => FrameFormat::Json,
        }
    }
}

/// Where the target listens and how to talk to it.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Target host.
    #[arg(long, env = "IRISRPC_HOST", default_value = "localhost")]
    pub host: String,
    /// Target port. 0 scans ports 7100-7109.
    #[arg(long, env = "IRISRPC_PORT", default_value = "0")]
    pub port: u16,
    /// Connect and call timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
    /// Restrict the handshake to one message format.
    #[arg(long, value_name = "FORMAT")]
    pub message_format: Option<MessageFormat>,
    /// Instance name requested at registration.
    #[arg(long, default_value = "client.irisrpc-cli")]
    pub instance_name: String,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Instance to ping (0 is the global instance).
    #[arg(long, default_value = "0")]
    pub inst_id: u64,
    /// Payload echoed back by the instance.
    #[arg(long)]
    pub payload: Option<String>,
    /// Number of pings.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Function name, e.g. `instance_getProperties`.
    pub method: String,
    /// Parameters as a JSON object.
    #[arg(long, default_value = "{}")]
    pub params: String,
    /// Destination instance id; overrides `instId` in --params.
    #[arg(long)]
    pub inst_id: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Only instance names matching this glob (`*` and `?`).
    pub pattern: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Connect to the target described by `args`.
///
/// An interrupt force-disconnects the client and exits with 130.
pub fn connect(args: &TargetArgs) -> CliResult<Arc<Client>> {
    let timeout = parse_duration(&args.timeout)?;
    let mut config = ClientConfig {
        instance_name: args.instance_name.clone(),
        call_timeout: timeout,
        connect_timeout: timeout,
        ..ClientConfig::default()
    };
    if let Some(format) = args.message_format {
        config = config.with_format(format.into());
    }

    let client = Arc::new(Client::new(config));
    install_ctrlc_handler(Arc::clone(&client))?;
    client
        .connect(&args.host, args.port)
        .map_err(|err| rpc_error("connect failed", err))?;
    info!(
        peer = %client.peer().unwrap_or_default(),
        inst_id = client.instance_id().unwrap_or_default(),
        "connected to target"
    );
    Ok(client)
}

fn install_ctrlc_handler(client: Arc<Client>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        client.disconnect(true);
        std::process::exit(INTERRUPTED);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Longest timeout accepted on the command line: one day.
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    let timeout = match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    };
    if timeout > MAX_TIMEOUT {
        return Err(CliError::new(
            USAGE,
            format!("timeout {input} exceeds {}s", MAX_TIMEOUT.as_secs()),
        ));
    }
    Ok(timeout)
}
