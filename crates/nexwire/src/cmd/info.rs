use serde::Serialize;

use crate::cmd::{client_config, connect_session, parse_duration, InfoArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{millis, print_json, OutputFormat};

#[derive(Serialize)]
struct PeerCreds {
    uid: u32,
    gid: u32,
    pid: Option<i32>,
}

#[derive(Serialize)]
struct InfoOutput {
    session_id: String,
    protocol_version: String,
    transport: &'static str,
    ping_latency_ms: Option<f64>,
    peer_credentials: Option<PeerCreds>,
    connected: bool,
}

pub async fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let session = connect_session(
        &args.path,
        client_config(args.auth_token.clone(), timeout),
        timeout,
    )
    .await?;

    let ping_latency_ms = session.ping().await.ok().map(millis);
    let peer_credentials = session.peer_credentials().map(|c| PeerCreds {
        uid: c.uid,
        gid: c.gid,
        pid: c.pid,
    });

    let out = InfoOutput {
        session_id: session.session_id().to_string(),
        protocol_version: session.protocol_version().to_string(),
        transport: session.transport_name(),
        ping_latency_ms,
        peer_credentials,
        connected: session.is_healthy(),
    };
    session.disconnect().await;

    print_info(&out, format);
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Session Info:");
            println!("  Session ID:       {}", out.session_id);
            println!("  Protocol:         nexwire {}", out.protocol_version);
            println!("  Transport:        {}", out.transport);
            match out.ping_latency_ms {
                Some(ms) => println!("  Ping:             {ms:.2}ms"),
                None => println!("  Ping:             unavailable"),
            }
            match &out.peer_credentials {
                Some(c) => println!(
                    "  Peer credentials: uid={} gid={} pid={}",
                    c.uid,
                    c.gid,
                    c.pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
                ),
                None => println!("  Peer credentials: unavailable"),
            }
        }
        OutputFormat::Raw => {
            println!("{}", out.session_id);
        }
    }
}
