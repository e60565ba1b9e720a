use std::time::Instant;

use irisrpc_u64json::{Object, Value};
use serde::Serialize;

use crate::cmd::{connect, PingArgs};
use crate::exit::{rpc_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct PingOutput {
    schema_id: &'static str,
    peer: String,
    message_format: String,
    client_inst_id: u64,
    client_inst_name: String,
    inst_id: u64,
    count: u32,
    latency_ms: Vec<f64>,
    min_ms: f64,
    max_ms: f64,
}

pub fn run(args: PingArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "count must be greater than zero"));
    }

    let client = connect(&args.target)?;
    let payload = args
        .payload
        .clone()
        .unwrap_or_else(|| "irisrpc ping".to_string());

    let mut latency_ms = Vec::with_capacity(args.count as usize);
    for _ in 0..args.count {
        let params: Object = [
            ("instId".to_string(), Value::UInt(args.inst_id)),
            ("payload".to_string(), Value::from(payload.as_str())),
        ]
        .into_iter()
        .collect();

        let start = Instant::now();
        let echoed = client
            .call("instance_ping", params)
            .map_err(|err| rpc_error("ping failed", err))?;
        latency_ms.push(round_ms(start.elapsed().as_secs_f64() * 1000.0));

        if echoed.as_str() != Some(payload.as_str()) {
            return Err(CliError::new(
                DATA_INVALID,
                format!("ping returned {echoed} instead of the payload"),
            ));
        }
    }

    let out = PingOutput {
        schema_id: "https://schemas.3leaps.dev/irisrpc/cli/v1/ping.schema.json",
        peer: client.peer().unwrap_or_default(),
        message_format: client
            .format()
            .map(|f| f.name().to_string())
            .unwrap_or_default(),
        client_inst_id: client.instance_id().unwrap_or_default(),
        client_inst_name: client.instance_name().unwrap_or_default(),
        inst_id: args.inst_id,
        count: args.count,
        min_ms: latency_ms.iter().copied().fold(f64::INFINITY, f64::min),
        max_ms: latency_ms.iter().copied().fold(0.0, f64::max),
        latency_ms,
    };
    client.disconnect(false);

    let fields = [
        ("Peer", out.peer.clone()),
        ("Format", out.message_format.clone()),
        (
            "Client",
            format!("{} ({})", out.client_inst_name, out.client_inst_id),
        ),
        ("Instance", out.inst_id.to_string()),
        ("Pings", out.count.to_string()),
        ("Min", format!("{:.2}ms", out.min_ms)),
        ("Max", format!("{:.2}ms", out.max_ms)),
    ];
    print_record(&out, &fields, format);
    Ok(SUCCESS)
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
