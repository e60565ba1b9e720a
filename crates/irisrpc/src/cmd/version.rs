use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("irisrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: irisrpc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("build_target: {}", env!("IRISRPC_BUILD_TARGET"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("protocol: {}", irisrpc_client::PROTOCOL);
    let formats: Vec<&str> = irisrpc_frame::FrameFormat::ALL
        .iter()
        .map(|f| f.name())
        .collect();
    println!("message_formats: {}", formats.join(", "));
    println!("features: client={}, cli=true", cfg!(feature = "client"));

    Ok(SUCCESS)
}
