//! Async driver for a [`Session`]
//!
//! The actor owns the session and the reader channel of the open link.
//! Viewer requests, transport events and timers are all handled from one
//! `select!` loop, so session state is never touched concurrently.

use super::{Action, JobHooks, Session, SessionConfig, Snapshot};
use crate::communication::{open_link, ConnectionParams, TransportEvent};
use machlink_core::{Error, EventDispatcher, MachineEvent, Result, RunState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

enum Command {
    Connect {
        params: ConnectionParams,
        reply: oneshot::Sender<Result<()>>,
    },
    Perform {
        action: Action,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Cloneable front end to a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: EventDispatcher,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl SessionHandle {
    /// Open a link; resolves once the transport is open, before detection
    pub async fn connect(&self, params: ConnectionParams) -> Result<()> {
        self.request(|reply| Command::Connect { params, reply })
            .await
    }

    /// Perform an action on the connected machine
    pub async fn perform(&self, action: Action) -> Result<()> {
        self.request(|reply| Command::Perform { action, reply })
            .await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| Error::other("session has stopped"))?;
        rx.await
            .map_err(|_| Error::other("session has stopped"))?
    }

    /// Live event stream
    pub fn subscribe(&self) -> broadcast::Receiver<MachineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Events that bring a newly attached viewer up to date
    pub fn snapshot(&self) -> Vec<MachineEvent> {
        self.snapshot.read().events()
    }

    pub fn run_state(&self) -> RunState {
        self.snapshot.read().run_state
    }

    /// Close the link and stop the actor
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Start a session actor on the current runtime
pub fn spawn_session(
    config: SessionConfig,
    events: EventDispatcher,
    hooks: Box<dyn JobHooks>,
) -> (SessionHandle, JoinHandle<()>) {
    let session = Session::new(config, events.clone(), hooks);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        tx,
        events,
        snapshot: session.shared_snapshot(),
    };
    let task = tokio::spawn(run(session, rx));
    (handle, task)
}

async fn run(mut session: Session, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut poll = time::interval(session.config().poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report = time::interval(session.config().queue_report_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut link_events: Option<mpsc::UnboundedReceiver<TransportEvent>> = None;

    tracing::debug!("Session actor started");
    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Connect { params, reply } => {
                        let result = connect(&mut session, &mut link_events, params).await;
                        respond(&session, reply, result);
                    }
                    Command::Perform { action, reply } => {
                        let result = session.handle(action, Instant::now());
                        respond(&session, reply, result);
                    }
                    Command::Shutdown => break,
                }
            }
            event = next_link_event(&mut link_events) => match event {
                Some(TransportEvent::Data(bytes)) => session.on_data(&bytes, Instant::now()),
                Some(TransportEvent::Closed(reason)) => session.on_closed(reason),
                None => session.on_closed(None),
            },
            _ = sleep_until(deadline) => session.on_timeout(Instant::now()),
            _ = poll.tick() => session.poll(),
            _ = report.tick() => session.report_queue(),
        }

        if !session.is_connected() {
            link_events = None;
        }
    }

    session.shutdown();
    tracing::debug!("Session actor stopped");
}

async fn connect(
    session: &mut Session,
    link_events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
    params: ConnectionParams,
) -> Result<()> {
    session.begin_connect(&params)?;
    match open_link(&params, session.config().connect_timeout).await {
        Ok(link) => {
            *link_events = Some(link.events);
            session.attach(link.params, link.writer, Instant::now());
            Ok(())
        }
        Err(e) => {
            session.connect_failed(&params);
            Err(e)
        }
    }
}

fn respond(session: &Session, reply: oneshot::Sender<Result<()>>, result: Result<()>) {
    if let Err(e) = &result {
        session.report_error(e);
    }
    let _ = reply.send(result);
}

async fn next_link_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
