use irisrpc_u64json::{json, Object, Value};

use crate::cmd::{connect, CallArgs};
use crate::exit::{rpc_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_value, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_params(&args.params, args.inst_id)?;
    let client = connect(&args.target)?;

    let result = client.call(&args.method, params);
    client.disconnect(false);

    let value = result.map_err(|err| rpc_error(&format!("{} failed", args.method), err))?;
    print_value(&value, format);
    Ok(SUCCESS)
}

/// Parse `--params` as a JSON object and apply `--inst-id`.
fn parse_params(text: &str, inst_id: Option<u64>) -> CliResult<Object> {
    let value = json::from_str(text)
        .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}")))?;
    let Value::Object(mut params) = value else {
        return Err(CliError::new(
            USAGE,
            format!("--params must be a JSON object, got {}", value.type_name()),
        ));
    };
    if let Some(inst_id) = inst_id {
        params.insert("instId".to_string(), Value::UInt(inst_id));
    }
    Ok(params)
}
