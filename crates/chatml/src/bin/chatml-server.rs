//! chatml broadcast hub.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chatml-server
//! cargo run --bin chatml-server -- --bind 0.0.0.0:9000 --uppercase
//! ```

use std::process::ExitCode;
use std::time::Duration;

use chatml::prelude::*;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chatml-server")]
#[command(about = "Room-based chat broadcast hub over WebSockets", long_about = None)]
struct Args {
    /// Address to bind the WebSocket listener to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: String,

    /// Seconds a new connection has to send its hello frame
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=3600))]
    handshake_timeout: u64,

    /// Recent text messages each room remembers
    #[arg(long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(0..=10_000))]
    history: u32,

    /// Deliveries a member may fall behind before being disconnected
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u32).range(1..=65_536))]
    outbound_capacity: u32,

    /// Close a room once its last member leaves
    #[arg(long)]
    close_empty_rooms: bool,

    /// Upper-case every text message before broadcast
    #[arg(long)]
    uppercase: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    chatml::logging::init("info");

    let args = Args::parse();

    let mut builder = ChatmlServer::builder()
        .bind(&args.bind)
        .handshake_timeout(Duration::from_secs(args.handshake_timeout))
        .room_config(RoomConfig {
            history_capacity: args.history as usize,
            close_when_empty: args.close_empty_rooms,
            ..RoomConfig::default()
        })
        .session_config(SessionConfig {
            outbound_capacity: args.outbound_capacity as usize,
            ..SessionConfig::default()
        });
    if args.uppercase {
        builder = builder.processor(Uppercase);
    }

    let server = match builder.build().await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, bind = %args.bind, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run_until_ctrl_c().await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
