use std::sync::Arc;

use anyhow::Context;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use morse_bus::{
    handle_request,
    rpc::{parse_error, parse_line},
    signals::write_lines,
    StdioBus,
};
use morse_core::{config::Config, connection::Connection, storage::SessionStore};
use morse_telegram::BotClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    morse_core::logging::init("morse")?;

    let cfg = Config::load()?;
    info!(
        account = %morse_core::logging::mask_phone(&cfg.params.account),
        data_dir = %cfg.data_dir.display(),
        "starting"
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let client = Arc::new(BotClient::new(cfg.telegram_bot_token.clone(), event_tx));

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let bus = StdioBus::new(out_tx);
    let writer = tokio::spawn(write_lines(out_rx, tokio::io::stdout()));

    let store = SessionStore::new(
        &cfg.data_dir,
        cfg.params.server_identifier().as_deref(),
        &cfg.params.account,
    )?;
    let mut conn = Connection::new(cfg.params.clone(), client, Arc::new(bus.clone()), store);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted");
                cancel.cancel();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while !conn.has_ended() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(event) = event_rx.recv() => conn.handle_event(event).await,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(req) => {
                        if let Some(resp) = handle_request(&mut conn, req).await {
                            bus.respond(&resp);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed request");
                        bus.respond(&parse_error());
                    }
                }
            }
        }
    }

    if let Err(e) = conn.disconnect().await {
        warn!(error = %e, "disconnect on shutdown failed");
    }
    drop(conn);
    drop(bus);
    writer.await.context("output writer")??;
    Ok(())
}
