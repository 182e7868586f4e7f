use machlink_communication::{spawn_session, Action, ConnectionParams, NoHooks, SessionConfig};
use machlink_core::{EventDispatcher, Firmware, MachineEvent, RunState, RunStatus};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Minimal Grbl: banner on connect, `ok` per line, status on `?`
async fn fake_grbl(mut socket: TcpStream) {
    let mut buf = [0u8; 512];
    let mut greeted = false;
    let mut pending = Vec::new();
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if !greeted {
            greeted = true;
            if socket.write_all(b"\r\nGrbl 1.1h ['$' for help]\r\n").await.is_err() {
                return;
            }
        }
        let mut reply = Vec::new();
        for &byte in &buf[..n] {
            match byte {
                b'?' => reply.extend_from_slice(b"<Idle|MPos:1.000,2.000,3.000|FS:0,0|WCO:0.000,0.000,0.000>\r\n"),
                b'\n' => {
                    if !pending.is_empty() {
                        reply.extend_from_slice(b"ok\r\n");
                    }
                    pending.clear();
                }
                other => pending.push(other),
            }
        }
        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<MachineEvent>,
    mut pred: impl FnMut(&MachineEvent) -> bool,
) -> MachineEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_telnet_session_runs_job() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            fake_grbl(socket).await;
        }
    });

    let dispatcher = EventDispatcher::new(1024);
    let mut events = dispatcher.subscribe();
    let (handle, task) = spawn_session(SessionConfig::default(), dispatcher, Box::new(NoHooks));

    let mut params = ConnectionParams::telnet("127.0.0.1");
    params.tcp_port = port;
    handle.connect(params).await.unwrap();

    let firmware = wait_for(&mut events, |e| matches!(e, MachineEvent::Firmware(_))).await;
    match firmware {
        MachineEvent::Firmware(info) => assert_eq!(info.firmware, Firmware::Grbl.tag()),
        _ => unreachable!(),
    }
    assert_eq!(handle.run_state(), RunState::Idle);

    wait_for(&mut events, |e| matches!(e, MachineEvent::WorkPosition(_))).await;

    handle
        .perform(Action::RunJob("G1 X1 F100\nG1 X2\nG1 X3\n".to_string()))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        *e == MachineEvent::RunStatus(RunStatus::Finished)
    })
    .await;

    let snapshot = handle.snapshot();
    assert!(snapshot.iter().any(|e| matches!(e, MachineEvent::Firmware(_))));
    assert!(!snapshot.iter().any(|e| matches!(e, MachineEvent::RunningJob(_))));

    handle.perform(Action::ClosePort).await.unwrap();
    wait_for(&mut events, |e| {
        *e == MachineEvent::ConnectStatus("Connect".to_string())
    })
    .await;

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_actions_fail_without_connection() {
    let dispatcher = EventDispatcher::new(64);
    let mut events = dispatcher.subscribe();
    let (handle, task) = spawn_session(SessionConfig::default(), dispatcher, Box::new(NoHooks));

    let err = handle.perform(Action::Pause).await.unwrap_err();
    assert!(err.is_not_connected());
    wait_for(&mut events, |e| matches!(e, MachineEvent::Error(_))).await;

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_refused_connect_returns_to_prompt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dispatcher = EventDispatcher::new(64);
    let mut events = dispatcher.subscribe();
    let (handle, task) = spawn_session(SessionConfig::default(), dispatcher, Box::new(NoHooks));

    let mut params = ConnectionParams::telnet("127.0.0.1");
    params.tcp_port = port;
    assert!(handle.connect(params).await.is_err());

    let opening = wait_for(&mut events, |e| matches!(e, MachineEvent::ConnectStatus(_))).await;
    assert_eq!(
        opening,
        MachineEvent::ConnectStatus("opening:127.0.0.1".to_string())
    );
    wait_for(&mut events, |e| {
        *e == MachineEvent::ConnectStatus("Connect".to_string())
    })
    .await;

    handle.shutdown();
    task.await.unwrap();
}
