//! Process entry point: line-framed TCP listener plus the cron scheduler,
//! both driven off one `tokio` runtime. One task per connection, one task
//! for the scheduler; the only cross-task shared state is the
//! [`Broadcaster`] registry and the sqlite file itself (each task opens its
//! own [`Store`] handle, never shares a connection across an `.await`).

use log::{error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use sectord::broadcaster::{Broadcaster, ClientHandle};
use sectord::config::CONFIG;
use sectord::cron;
use sectord::dispatcher::{self, ClientContext};
use sectord::seed;
use sectord::store::Store;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();

    info!("starting sectord, db_path={}", CONFIG.db_path);

    let boot_store = Store::open(&CONFIG.db_path).expect("failed to open database");
    seed::ensure_schema(&boot_store).expect("failed to apply schema/seed");
    drop(boot_store);

    let broadcaster = Arc::new(Broadcaster::new());

    let cron_handle = {
        let broadcaster = broadcaster.clone();
        tokio::spawn(cron::run_scheduler(broadcaster))
    };

    let addr = format!("0.0.0.0:{}", CONFIG.default_server_port);
    let listener = TcpListener::bind(&addr).await.expect("failed to bind listener");
    info!("listening on {addr}");

    let mut shutdown = shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
                        info!("conn {conn_id} accepted from {peer}");
                        let broadcaster = broadcaster.clone();
                        tokio::spawn(async move {
                            handle_connection(conn_id, socket, broadcaster).await;
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, draining connections");
                break;
            }
        }
    }

    cron_handle.abort();
    info!("sectord stopped");
}

#[cfg(unix)]
fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};
    Box::pin(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    Box::pin(async move {
        let _ = tokio::signal::ctrl_c().await;
    })
}

/// One worker per connection: a reader half that parses and dispatches
/// lines, and a writer half fed both by direct replies and by anything
/// [`Broadcaster`] pushes to this player from another task.
async fn handle_connection(conn_id: u64, socket: TcpStream, broadcaster: Arc<Broadcaster>) {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    broadcaster.register(
        conn_id,
        ClientHandle {
            player_id: 0,
            sender: outbound_tx.clone(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write_half.write_all(frame.to_line().as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut ctx = ClientContext::new(conn_id);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("conn {conn_id} read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let prior_player = ctx.player_id;
        let reply = dispatcher::handle_line(&mut ctx, &CONFIG.db_path, &line);
        if ctx.player_id != prior_player {
            broadcaster.set_player(conn_id, ctx.player_id);
        }
        if outbound_tx.send(reply).is_err() {
            break;
        }
    }

    broadcaster.unregister(conn_id);
    drop(outbound_tx);
    if let Err(e) = writer.await {
        error!("conn {conn_id} writer task panicked: {e}");
    }
    info!("conn {conn_id} closed");
}
