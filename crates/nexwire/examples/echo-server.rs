//! Minimal server: accepts one client, serves `echo` until it disconnects.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- call /tmp/nexwire-echo-<pid>/echo.sock -m 1 --data hello

use std::fs;
use std::sync::Arc;

use nexwire::{MethodTable, SessionListener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("nexwire-echo-{}", std::process::id()));
    fs::create_dir_all(&sock_dir)?;
    let sock_path = sock_dir.join("echo.sock");

    let methods = MethodTable::new().with_method(1, "echo", |args, ctx| async move {
        eprintln!(
            "invocation {} echoing {} bytes",
            ctx.invocation_id(),
            args.len()
        );
        Ok(args)
    });
    let listener = SessionListener::bind(&sock_path, Arc::new(methods))?;
    eprintln!("Listening on {}", sock_path.display());

    let session = listener.accept().await?;
    eprintln!("Session started: {}", session.session_id());

    let reason = session.disconnected().await;
    eprintln!("Session ended: {reason}");

    drop(listener);
    let _ = fs::remove_dir_all(&sock_dir);
    Ok(())
}
