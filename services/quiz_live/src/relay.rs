//! Cross-process event relay: other processes push line-delimited JSON
//! events over TCP and each one is broadcast through the hub.

use anyhow::{Context, Result};
use hub_api::Event;
use livehub::Hub;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read a single line-delimited JSON event. Blank lines are skipped and
/// `None` marks the end of the stream.
pub async fn read_event<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Event>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }
    let event = serde_json::from_str(line.trim()).context("malformed relay event")?;
    Ok(Some(event))
}

/// Write a single event as line-delimited JSON to the writer.
pub async fn write_event<W: AsyncWrite + Unpin>(writer: &mut W, event: &Event) -> Result<()> {
    let s = serde_json::to_string(event)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Connect to a relay listener and push one event.
pub async fn publish(addr: &str, event: &Event) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to relay at {addr}"))?;
    let mut writer = BufWriter::new(stream);
    write_event(&mut writer, event).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Accept relay connections until `shutdown` fires.
pub async fn serve(listener: TcpListener, hub: Hub, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "relay producer connected");
                    tokio::spawn(forward(stream, peer.to_string(), hub.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "relay accept failed"),
            },
        }
    }
    info!("relay stopped");
}

async fn forward(stream: TcpStream, peer: String, hub: Hub, shutdown: CancellationToken) {
    let mut reader = BufReader::new(stream);
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = read_event(&mut reader) => next,
        };
        match next {
            Ok(Some(event)) => hub.broadcast(event.kind, event.data, event.topic).await,
            Ok(None) => break,
            Err(e) if e.downcast_ref::<serde_json::Error>().is_some() => {
                warn!(%peer, error = %e, "skipping malformed relay line");
            }
            Err(e) => {
                debug!(%peer, error = %e, "relay read failed");
                break;
            }
        }
    }
    debug!(%peer, "relay producer disconnected");
}
