use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay daemon.
    Serve(ServeArgs),
    /// Publish a single envelope.
    Send(SendArgs),
    /// Subscribe and print received envelopes.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Listen(args) => listen::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// The IP address to listen on for TCP connections, 0.0.0.0 for all.
    #[arg(long, value_name = "IP", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub tcp_listen: IpAddr,
    /// The port to listen on for TCP connections.
    #[arg(long, value_name = "PORT", default_value_t = 11101)]
    pub tcp_port: u16,
    /// The IP address to listen on for WebSocket connections, 0.0.0.0 for all.
    #[arg(long, value_name = "IP", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub ws_listen: IpAddr,
    /// The port to listen on for WebSocket connections.
    #[arg(long, value_name = "PORT", default_value_t = 11102)]
    pub ws_port: u16,
    /// Disable the WebSocket listener.
    #[arg(long)]
    pub no_ws: bool,
    /// Enable the IRC bridge (`irc:servers` roster).
    #[arg(long)]
    pub irc: bool,
    /// Enable the backlog backend against this SQLite URL
    /// (e.g. sqlite://backlog.db, sqlite::memory:).
    #[arg(long, value_name = "URL")]
    pub backlog_db: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay TCP address to connect to.
    pub addr: SocketAddr,
    /// Channel to publish on.
    #[arg(long, short = 'c')]
    pub channel: String,
    /// Command verb.
    #[arg(long)]
    pub cmd: String,
    /// JSON object payload.
    #[arg(long)]
    pub data: Option<String>,
    /// Correlate this envelope to a previous message id.
    #[arg(long, value_name = "UUID")]
    pub reply_to: Option<Uuid>,
    /// Wait for the correlated reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Relay TCP address to connect to.
    pub addr: SocketAddr,
    /// Channels to subscribe to (comma-separated).
    #[arg(long, value_delimiter = ',', conflicts_with = "monitor")]
    pub channels: Option<Vec<String>>,
    /// Observe all application broadcasts regardless of subscription.
    #[arg(long)]
    pub monitor: bool,
    /// Exit after receiving N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
