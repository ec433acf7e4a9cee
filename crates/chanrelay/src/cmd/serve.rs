use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use chanrelay_backlog::{Backlog, CHANNELS_CHANNEL};
use chanrelay_core::{spawn_backend, Hub};
use chanrelay_irc::IrcBridge;
use chanrelay_transport::{TcpRelayListener, WsRelayListener};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, relay_error, transport_error, CliResult, SUCCESS};

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let hub = Arc::new(Hub::new());

    let tcp_addr = SocketAddr::new(args.tcp_listen, args.tcp_port);
    let tcp = TcpRelayListener::bind(tcp_addr)
        .await
        .map_err(|err| transport_error("tcp bind failed", err))?;
    let tcp_hub = Arc::clone(&hub);
    tokio::spawn(async move {
        if let Err(err) = tcp.serve(tcp_hub).await {
            tracing::error!(%err, "tcp listener failed");
        }
    });

    if !args.no_ws {
        let ws_addr = SocketAddr::new(args.ws_listen, args.ws_port);
        let ws = WsRelayListener::bind(ws_addr)
            .await
            .map_err(|err| transport_error("websocket bind failed", err))?;
        let ws_hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(err) = ws.serve(ws_hub).await {
                tracing::error!(%err, "websocket listener failed");
            }
        });
    }

    // Backend handles are held until shutdown; dropping them cancels the
    // backing tasks.
    let _irc = args.irc.then(|| IrcBridge::spawn(Arc::clone(&hub)));

    let _backlog = match &args.backlog_db {
        None => None,
        Some(url) => {
            let backlog = Backlog::connect(url)
                .await
                .map_err(|err| relay_error("backlog open failed", err))?;
            Some(spawn_backend(
                Arc::clone(&hub),
                backlog,
                &[CHANNELS_CHANNEL],
            ))
        }
    };

    info!("relay up");
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| io_error("waiting for shutdown signal failed", err))?;
    info!("shutting down");

    Ok(SUCCESS)
}
