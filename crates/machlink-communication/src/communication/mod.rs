//! Machine transports
//!
//! Every transport is split in two halves:
//! - a [`Communicator`], the synchronous write side owned by the session
//! - a channel of [`TransportEvent`]s fed by a background reader
//!
//! The session never awaits a write, so all link state stays in one
//! sequential context.

pub mod flow;
pub mod framer;
pub mod serial;
pub mod tcp;
pub mod websocket;

use machlink_core::{ConnectionError, Error, Result, TransportKind};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;

pub use flow::{CommandQueue, Drained, FlowCredit, FlowLimits, FlowQueue};
pub use framer::LineFramer;

/// Something the reader half observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Raw bytes from the machine
    Data(Vec<u8>),
    /// The link went away, with the reason when it was an error
    Closed(Option<String>),
}

/// Write half of an open link
pub trait Communicator: Send {
    /// Write bytes to the machine
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Close the link; the reader half stops soon after
    fn close(&mut self);

    /// Port path or host this link points at
    fn target(&self) -> &str;
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    /// Transport kind
    pub kind: TransportKind,
    /// Serial device path or host name
    pub target: String,
    /// Baud rate, serial only
    pub baud_rate: u32,
    /// TCP port, telnet only
    pub tcp_port: u16,
}

impl ConnectionParams {
    /// Serial link
    pub fn usb(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            kind: TransportKind::Usb,
            target: path.into(),
            baud_rate,
            tcp_port: 0,
        }
    }

    /// Raw TCP link on the telnet port
    pub fn telnet(host: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Telnet,
            target: host.into(),
            baud_rate: 0,
            tcp_port: 23,
        }
    }

    /// WebSocket link to an ESP8266 bridge
    pub fn esp(host: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Esp,
            target: host.into(),
            baud_rate: 0,
            tcp_port: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "missing port or host".to_string(),
            }
            .into());
        }
        if self.kind == TransportKind::Usb && self.baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "missing baud rate".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportKind::Usb => write!(f, "usb {} @ {}", self.target, self.baud_rate),
            TransportKind::Telnet => write!(f, "telnet {}:{}", self.target, self.tcp_port),
            TransportKind::Esp => write!(f, "esp ws://{}/", self.target),
        }
    }
}

/// Parses the panel's `kind,target[,baud]` connect string
impl FromStr for ConnectionParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(str::trim);
        let kind = parts.next().unwrap_or_default().to_ascii_lowercase();
        let target = parts.next().unwrap_or_default();
        let params = match kind.as_str() {
            "usb" => {
                let baud = parts
                    .next()
                    .unwrap_or_default()
                    .trim_end_matches("baud")
                    .parse::<u32>()
                    .map_err(|_| ConnectionError::InvalidParameters {
                        reason: format!("bad baud rate in '{}'", s),
                    })?;
                ConnectionParams::usb(target, baud)
            }
            "telnet" => ConnectionParams::telnet(target),
            "esp" | "esp8266" => ConnectionParams::esp(target),
            other => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("unknown interface '{}'", other),
                }
                .into())
            }
        };
        params.validate()?;
        Ok(params)
    }
}

/// An open link: write half plus the reader's event stream
pub struct Link {
    pub params: ConnectionParams,
    pub writer: Box<dyn Communicator>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("params", &self.params).finish()
    }
}

/// Open the transport named by `params`
pub async fn open_link(params: &ConnectionParams, timeout: Duration) -> Result<Link> {
    params.validate()?;
    tracing::info!("Opening {}", params);

    let (tx, events) = mpsc::unbounded_channel();
    let opening = async {
        match params.kind {
            TransportKind::Usb => {
                let p = params.clone();
                tokio::task::spawn_blocking(move || serial::open(&p, tx))
                    .await
                    .map_err(|e| Error::other(format!("serial open task failed: {}", e)))?
            }
            TransportKind::Telnet => tcp::open(params, tx).await,
            TransportKind::Esp => websocket::open(params, tx).await,
        }
    };

    let writer = tokio::time::timeout(timeout, opening)
        .await
        .map_err(|_| ConnectionError::ConnectionTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;

    Ok(Link {
        params: params.clone(),
        writer,
        events,
    })
}
