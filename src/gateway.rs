//! Viewer WebSocket gateway
//!
//! Control panels attach over WebSocket and exchange JSON text frames:
//! - inbound `{"action": "<name>", "data": ...}` requests, funneled into the session actor
//! - outbound `{"event": "<name>", "data": ...}` machine events, fanned out to every viewer
//!
//! Viewers never touch link state directly. A failed action is broadcast as an
//! `error` event by the session, so every panel reflects it.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use machlink_communication::{
    list_ports, Action, AxisSelector, ClearMethod, ConnectionParams, Coordinates, JogStep,
    JogTarget, LaserRequest, MotionCommand, ProbeRequest, SdOperation, SessionHandle,
};
use machlink_core::{MachineEvent, PortEntry, TransportKind};
use machlink_settings::{Config, ConnectionSettings};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type ViewerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Request sent by a control panel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum ViewerRequest {
    /// Re-send the current machine snapshot to this viewer
    #[serde(alias = "firstLoad")]
    Snapshot,
    #[serde(alias = "getPorts")]
    ListPorts,
    /// `kind,target[,baud]`, e.g. `usb,/dev/ttyUSB0,115200` or `telnet,192.168.1.20`
    #[serde(alias = "connectTo")]
    Connect(String),
    RunJob(String),
    RunCommand(String),
    Jog(JogStep),
    JogTo(JogTarget),
    Home(AxisSelector),
    SetZero(AxisSelector),
    GotoZero(AxisSelector),
    SetPosition(Coordinates),
    Probe(ProbeRequest),
    FeedOverride(i32),
    SpindleOverride(i32),
    LaserTest {
        power: f64,
        #[serde(default)]
        duration: u64,
        #[serde(rename = "maxS")]
        max_s: f64,
    },
    Pause,
    Resume,
    Stop,
    ClearAlarm(u8),
    ResetMachine,
    ClosePort,
    #[serde(rename = "sd.list")]
    SdList,
    #[serde(rename = "sd.cd")]
    SdCd(String),
    #[serde(rename = "sd.rm")]
    SdRm(String),
    #[serde(rename = "sd.mv")]
    SdMv {
        file: String,
        #[serde(rename = "newFile", alias = "newfile")]
        new_file: String,
    },
    #[serde(rename = "sd.play")]
    SdPlay(String),
    #[serde(rename = "sd.pause")]
    SdPause,
    #[serde(rename = "sd.resume")]
    SdResume,
    #[serde(rename = "sd.abort")]
    SdAbort,
    #[serde(rename = "sd.upload")]
    SdUpload { filename: String, gcode: String },
    #[serde(rename = "sd.progress")]
    SdProgress,
}

/// Where a parsed request goes
#[derive(Debug, Clone, PartialEq)]
enum Routed {
    Snapshot,
    ListPorts,
    Connect(ConnectionParams),
    Perform(Action),
}

impl ViewerRequest {
    fn route(self, connection: &ConnectionSettings) -> machlink_core::Result<Routed> {
        let action = match self {
            ViewerRequest::Snapshot => return Ok(Routed::Snapshot),
            ViewerRequest::ListPorts => return Ok(Routed::ListPorts),
            ViewerRequest::Connect(spec) => {
                return connection_params(&spec, connection).map(Routed::Connect)
            }
            ViewerRequest::RunJob(text) => Action::RunJob(text),
            ViewerRequest::RunCommand(text) => Action::RunCommand(text),
            ViewerRequest::Jog(step) => Action::Motion(MotionCommand::Jog(step)),
            ViewerRequest::JogTo(target) => Action::Motion(MotionCommand::JogTo(target)),
            ViewerRequest::Home(axis) => Action::Motion(MotionCommand::Home(axis)),
            ViewerRequest::SetZero(axis) => Action::Motion(MotionCommand::SetZero(axis)),
            ViewerRequest::GotoZero(axis) => Action::Motion(MotionCommand::GotoZero(axis)),
            ViewerRequest::SetPosition(coords) => {
                Action::Motion(MotionCommand::SetPosition(coords))
            }
            ViewerRequest::Probe(probe) => Action::Motion(MotionCommand::Probe(probe)),
            ViewerRequest::FeedOverride(delta) => Action::FeedOverride(delta),
            ViewerRequest::SpindleOverride(delta) => Action::SpindleOverride(delta),
            ViewerRequest::LaserTest {
                power,
                duration,
                max_s,
            } => Action::LaserTest(LaserRequest {
                power,
                duration_ms: duration,
                max_s,
            }),
            ViewerRequest::Pause => Action::Pause,
            ViewerRequest::Resume => Action::Resume,
            ViewerRequest::Stop => Action::Stop,
            ViewerRequest::ClearAlarm(method) => {
                Action::ClearAlarm(ClearMethod::try_from(method)?)
            }
            ViewerRequest::ResetMachine => Action::ResetMachine,
            ViewerRequest::ClosePort => Action::ClosePort,
            ViewerRequest::SdList => Action::Sd(SdOperation::List),
            ViewerRequest::SdCd(dir) => Action::Sd(SdOperation::Cd(dir)),
            ViewerRequest::SdRm(file) => Action::Sd(SdOperation::Rm(file)),
            ViewerRequest::SdMv { file, new_file } => {
                Action::Sd(SdOperation::Mv { file, new_file })
            }
            ViewerRequest::SdPlay(file) => Action::Sd(SdOperation::Play(file)),
            ViewerRequest::SdPause => Action::Sd(SdOperation::Pause),
            ViewerRequest::SdResume => Action::Sd(SdOperation::Resume),
            ViewerRequest::SdAbort => Action::Sd(SdOperation::Abort),
            ViewerRequest::SdUpload { filename, gcode } => {
                Action::Sd(SdOperation::Upload { filename, gcode })
            }
            ViewerRequest::SdProgress => Action::Sd(SdOperation::Progress),
        };
        Ok(Routed::Perform(action))
    }
}

/// Parse a `kind,target[,baud]` connect string
///
/// A usb string without a baud rate falls back to the configured one; telnet
/// links use the configured port.
pub fn connection_params(
    spec: &str,
    settings: &ConnectionSettings,
) -> machlink_core::Result<ConnectionParams> {
    let spec = spec.trim().trim_end_matches(',');
    let parts = spec.split(',').count();
    let is_usb = spec.to_ascii_lowercase().starts_with("usb");
    let mut params: ConnectionParams = if is_usb && parts == 2 {
        format!("{},{}", spec, settings.baud_rate).parse()?
    } else {
        spec.parse()?
    };
    if params.kind == TransportKind::Telnet {
        params.tcp_port = settings.telnet_port;
    }
    Ok(params)
}

/// State shared by every viewer task
struct Shared {
    session: SessionHandle,
    connection: ConnectionSettings,
}

/// Accepts control panel connections and bridges them to the session
pub struct Gateway {
    bind: String,
    port_scan_interval: Duration,
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(session: SessionHandle, config: &Config) -> Self {
        Self {
            bind: config.server.bind.clone(),
            port_scan_interval: Duration::from_millis(config.server.port_scan_interval_ms),
            shared: Arc::new(Shared {
                session,
                connection: config.connection.clone(),
            }),
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("failed to bind viewer gateway on {}", self.bind))?;
        self.serve(listener, shutdown).await
    }

    /// Serve viewers on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let local = listener.local_addr().context("listener has no local address")?;
        info!("Viewer gateway listening on ws://{}", local);

        let scanner = tokio::spawn(scan_ports(
            self.shared.session.clone(),
            self.port_scan_interval,
        ));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Viewer gateway shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            match serve_viewer(stream, peer, shared).await {
                                Ok(()) => debug!("Viewer {} left", peer),
                                Err(e) => warn!("Viewer {} dropped: {:#}", peer, e),
                            }
                        });
                    }
                    Err(e) => error!("Accept failed: {}", e),
                },
            }
        }

        scanner.abort();
        Ok(())
    }
}

async fn serve_viewer(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> anyhow::Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {}", peer))?;
    let id = Uuid::new_v4();
    info!("Viewer {} attached from {}", id, peer);

    let (mut sink, mut source) = ws.split();

    // subscribe first so nothing published during the snapshot is missed
    let mut events = shared.session.subscribe();
    send_snapshot(&mut sink, &shared.session).await?;
    if let Some(ports) = current_ports().await {
        send_event(&mut sink, &MachineEvent::Ports(ports)).await?;
    }

    loop {
        tokio::select! {
            frame = source.next() => {
                let Some(frame) = frame else { break };
                match frame.context("viewer stream failed")? {
                    Message::Text(text) => handle_request(id, &text, &mut sink, &shared).await?,
                    Message::Close(_) => break,
                    other => debug!("Viewer {} ignored {} byte frame", id, other.len()),
                }
            }
            event = events.recv() => match event {
                Ok(event) => send_event(&mut sink, &event).await?,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Viewer {} lagged, {} events skipped", id, missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    info!("Viewer {} detached", id);
    Ok(())
}

async fn handle_request(
    id: Uuid,
    text: &str,
    sink: &mut ViewerSink,
    shared: &Shared,
) -> anyhow::Result<()> {
    let routed = serde_json::from_str::<ViewerRequest>(text)
        .map_err(|e| machlink_core::Error::invalid_parameters(format!("bad request: {}", e)))
        .and_then(|request| request.route(&shared.connection));

    let routed = match routed {
        Ok(routed) => routed,
        Err(e) => {
            debug!("Viewer {} sent unusable request: {}", id, e);
            return send_event(sink, &MachineEvent::Error(e.to_string())).await;
        }
    };

    match routed {
        Routed::Snapshot => send_snapshot(sink, &shared.session).await,
        Routed::ListPorts => {
            let ports = current_ports().await.unwrap_or_default();
            send_event(sink, &MachineEvent::Ports(ports)).await
        }
        // failures are broadcast by the session, so the reply is not awaited here
        Routed::Connect(params) => {
            info!("Viewer {} connecting to {}", id, params.target);
            let session = shared.session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.connect(params).await {
                    debug!("Connect failed: {}", e);
                }
            });
            Ok(())
        }
        Routed::Perform(action) => {
            debug!("Viewer {} requested {}", id, action.name());
            let session = shared.session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.perform(action).await {
                    debug!("Action failed: {}", e);
                }
            });
            Ok(())
        }
    }
}

async fn send_snapshot(sink: &mut ViewerSink, session: &SessionHandle) -> anyhow::Result<()> {
    for event in session.snapshot() {
        send_event(sink, &event).await?;
    }
    Ok(())
}

async fn send_event(sink: &mut ViewerSink, event: &MachineEvent) -> anyhow::Result<()> {
    let json = serde_json::to_string(event).context("failed to encode event")?;
    sink.send(Message::Text(json))
        .await
        .context("failed to send to viewer")
}

async fn current_ports() -> Option<Vec<PortEntry>> {
    match tokio::task::spawn_blocking(list_ports).await {
        Ok(Ok(ports)) => Some(ports),
        Ok(Err(e)) => {
            debug!("Port listing failed: {}", e);
            None
        }
        Err(e) => {
            warn!("Port listing task failed: {}", e);
            None
        }
    }
}

/// Publish the serial port list whenever it changes
async fn scan_ports(session: SessionHandle, every: Duration) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last: Option<Vec<PortEntry>> = None;
    loop {
        ticker.tick().await;
        let Some(ports) = current_ports().await else {
            continue;
        };
        if last.as_ref() != Some(&ports) {
            debug!("Serial ports changed: {} found", ports.len());
            session.events().publish(MachineEvent::Ports(ports.clone()));
            last = Some(ports);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ViewerRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_motion_requests() {
        assert_eq!(
            parse(r#"{"action":"jog","data":{"dir":"X","dist":-10,"feed":1000}}"#),
            ViewerRequest::Jog(JogStep {
                dir: "X".to_string(),
                dist: -10.0,
                feed: 1000.0,
            })
        );
        assert_eq!(
            parse(r#"{"action":"home","data":"all"}"#),
            ViewerRequest::Home(AxisSelector::All)
        );
        match parse(r#"{"action":"jogTo","data":{"x":5,"z":1,"mode":1}}"#) {
            ViewerRequest::JogTo(target) => {
                assert_eq!(target.target.x, Some(5.0));
                assert_eq!(target.target.y, None);
                assert_eq!(target.mode, 1);
                assert_eq!(target.feed, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_and_sd_requests() {
        assert_eq!(parse(r#"{"action":"pause"}"#), ViewerRequest::Pause);
        assert_eq!(parse(r#"{"action":"sd.list"}"#), ViewerRequest::SdList);
        assert_eq!(
            parse(r#"{"action":"sd.mv","data":{"file":"a.g","newfile":"b.g"}}"#),
            ViewerRequest::SdMv {
                file: "a.g".to_string(),
                new_file: "b.g".to_string(),
            }
        );
        assert_eq!(parse(r#"{"action":"getPorts"}"#), ViewerRequest::ListPorts);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ViewerRequest>(r#"{"action":"selfDestruct"}"#).is_err());
    }

    #[test]
    fn test_route_laser_and_clear_alarm() {
        let settings = ConnectionSettings::default();
        let routed = parse(r#"{"action":"laserTest","data":{"power":50,"duration":200,"maxS":1000}}"#)
            .route(&settings)
            .unwrap();
        assert_eq!(
            routed,
            Routed::Perform(Action::LaserTest(LaserRequest {
                power: 50.0,
                duration_ms: 200,
                max_s: 1000.0,
            }))
        );

        assert_eq!(
            ViewerRequest::ClearAlarm(2).route(&settings).unwrap(),
            Routed::Perform(Action::ClearAlarm(ClearMethod::Flush))
        );
        let err = ViewerRequest::ClearAlarm(7).route(&settings).unwrap_err();
        assert!(err.is_controller_error());
    }

    #[test]
    fn test_connection_params_defaults() {
        let settings = ConnectionSettings {
            baud_rate: 250000,
            telnet_port: 2323,
            ..Default::default()
        };

        let usb = connection_params("usb,/dev/ttyACM0", &settings).unwrap();
        assert_eq!(usb.kind, TransportKind::Usb);
        assert_eq!(usb.baud_rate, 250000);

        let explicit = connection_params("usb,/dev/ttyACM0,115200baud", &settings).unwrap();
        assert_eq!(explicit.baud_rate, 115200);

        let telnet = connection_params("telnet,192.168.1.20", &settings).unwrap();
        assert_eq!(telnet.target, "192.168.1.20");
        assert_eq!(telnet.tcp_port, 2323);

        assert!(connection_params("telnet", &settings).is_err());
        assert!(connection_params("bluetooth,foo", &settings).is_err());
    }
}
