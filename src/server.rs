use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::FrameCodec;
use crate::config::Config;
use crate::connection::Connection;
use crate::db::Db;
use crate::frame::{self, Frame};
use crate::Error;

/// Replays the append-only file, then serves clients until Ctrl-C is received.
pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let db = Db::open(&config.aof_path, config.sync_interval).await?;

    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    let codec = FrameCodec::new(config.max_frame_size);
    let served = serve(listener, db.clone(), codec, signal::ctrl_c()).await;

    db.close().await?;
    served
}

/// Accepts connections until `shutdown` completes, serving each one on its own task.
pub async fn serve(
    listener: TcpListener,
    db: Db,
    codec: FrameCodec,
    shutdown: impl Future,
) -> Result<(), Error> {
    tokio::pin!(shutdown);

    loop {
        let (socket, client_address) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("Shutting down");
                return Ok(());
            }
        };

        let db = db.clone();
        info!("Accepted connection from {:?}", client_address);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, client_address, db, codec).await {
                error!("Connection error: {}", e);
            }
        });
    }
}

#[instrument(
    name = "connection",
    skip(stream, db, codec),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    db: Db,
    codec: FrameCodec,
) -> Result<(), Error> {
    let mut conn = Connection::with_codec(stream, codec);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    loop {
        let frame = match conn.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(frame::Error::Io(e)) => return Err(e.into()),
            Err(e) => {
                // The stream can't be resynchronized after a bad frame, so only this
                // connection is dropped.
                warn!("Protocol error: {}", e);
                conn.write_frame(Frame::Error(format!("ERR Protocol error: {}", e)))
                    .await?;
                return Err(e.into());
            }
        };

        debug!("Received frame from client: {}", frame);
        let res = db.execute(frame).await;
        debug!("Sending response to client: {}", res);

        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}
