//! ESP8266 WebSocket transport
//!
//! The ESP bridges its serial port to a WebSocket at `ws://<ip>/`. Machine
//! output arrives as text or binary frames, both handled as raw bytes.

use super::{Communicator, ConnectionParams, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use machlink_core::{ConnectionError, Result};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Write half of an ESP link
pub struct WebSocketCommunicator {
    outbound: Option<UnboundedSender<Vec<u8>>>,
    reader: JoinHandle<()>,
    target: String,
}

impl Communicator for WebSocketCommunicator {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let tx = self.outbound.as_ref().ok_or_else(|| ConnectionError::ConnectionLost {
            reason: "link closed".to_string(),
        })?;
        tx.send(data.to_vec())
            .map_err(|_| ConnectionError::WebSocketError {
                reason: format!("writer for {} has stopped", self.target),
            })?;
        Ok(data.len())
    }

    fn close(&mut self) {
        self.outbound.take();
        self.reader.abort();
    }

    fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for WebSocketCommunicator {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Text frame when the bytes are valid UTF-8, binary otherwise
fn frame(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

pub(crate) async fn open(
    params: &ConnectionParams,
    events: UnboundedSender<TransportEvent>,
) -> Result<Box<dyn Communicator>> {
    let url = format!("ws://{}/", params.target);
    let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
        tracing::warn!("Failed to connect to {}: {}", url, e);
        ConnectionError::FailedToOpen {
            target: url.clone(),
            reason: e.to_string(),
        }
    })?;
    let (mut sink, mut source) = stream.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(e) = sink.send(frame(bytes)).await {
                tracing::warn!("ESP write failed: {}", e);
                let _ = writer_events.send(TransportEvent::Closed(Some(e.to_string())));
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let name = url.clone();
    let reader = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let bytes = match message {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("ESP read from {} failed: {}", name, e);
                    let _ = events.send(TransportEvent::Closed(Some(e.to_string())));
                    return;
                }
            };
            if events.send(TransportEvent::Data(bytes)).is_err() {
                return;
            }
        }
        tracing::info!("ESP {} closed the connection", name);
        let _ = events.send(TransportEvent::Closed(None));
    });

    tracing::info!("ESP connected at {}", url);
    Ok(Box::new(WebSocketCommunicator {
        outbound: Some(outbound),
        reader,
        target: params.target.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_bytes_go_binary() {
        assert_eq!(frame(b"G0 X1\n".to_vec()), Message::Text("G0 X1\n".to_string()));
        assert_eq!(frame(vec![0x90]), Message::Binary(vec![0x90]));
    }
}
