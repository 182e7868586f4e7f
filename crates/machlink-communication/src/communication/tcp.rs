//! Telnet transport
//!
//! Raw TCP to a networked controller, normally port 23. A reader task turns
//! socket reads into [`TransportEvent`]s; writes go through an unbounded
//! channel to a writer task so the session never blocks on the socket.

use super::{Communicator, ConnectionParams, TransportEvent};
use machlink_core::{ConnectionError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

/// Write half of a telnet link
pub struct TcpCommunicator {
    outbound: Option<UnboundedSender<Vec<u8>>>,
    reader: JoinHandle<()>,
    target: String,
}

impl Communicator for TcpCommunicator {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let tx = self.outbound.as_ref().ok_or_else(|| ConnectionError::ConnectionLost {
            reason: "link closed".to_string(),
        })?;
        tx.send(data.to_vec())
            .map_err(|_| ConnectionError::TcpError {
                reason: format!("writer for {} has stopped", self.target),
            })?;
        Ok(data.len())
    }

    fn close(&mut self) {
        // dropping the sender ends the writer task, which shuts the socket down
        self.outbound.take();
        self.reader.abort();
    }

    fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub(crate) async fn open(
    params: &ConnectionParams,
    events: UnboundedSender<TransportEvent>,
) -> Result<Box<dyn Communicator>> {
    let address = format!("{}:{}", params.target, params.tcp_port);
    let stream = TcpStream::connect(&address).await.map_err(|e| {
        tracing::warn!("Failed to connect to {}: {}", address, e);
        ConnectionError::FailedToOpen {
            target: address.clone(),
            reason: e.to_string(),
        }
    })?;
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                tracing::warn!("Telnet write failed: {}", e);
                let _ = writer_events.send(TransportEvent::Closed(Some(e.to_string())));
                return;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let name = address.clone();
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    tracing::info!("Telnet peer {} closed the connection", name);
                    let _ = events.send(TransportEvent::Closed(None));
                    return;
                }
                Ok(n) => {
                    if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("Telnet read from {} failed: {}", name, e);
                    let _ = events.send(TransportEvent::Closed(Some(e.to_string())));
                    return;
                }
            }
        }
    });

    tracing::info!("Telnet connected to {}", address);
    Ok(Box::new(TcpCommunicator {
        outbound: Some(outbound),
        reader,
        target: params.target.clone(),
    }))
}
