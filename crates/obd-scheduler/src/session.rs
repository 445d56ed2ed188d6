//! Async OBD Session
//!
//! Runs an [`ObdEngine`] over any byte stream (serial port, RFCOMM socket,
//! in-memory duplex). One task owns the engine; [`SessionHandle`]s reach it
//! through a command channel and observe it through watch channels.

use crate::connection::ConnectionState;
use crate::engine::{ObdEngine, Responder};
use data_validator::VehicleSnapshot;
use obd_protocol::{DecodedResponse, ObdError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Pending handle commands
const COMMAND_CAPACITY: usize = 32;
const READ_BUFFER_SIZE: usize = 256;

#[derive(Debug)]
enum SessionCommand {
    Request { id: String, responder: Responder },
    StartPolling {
        responder: oneshot::Sender<Result<(), ObdError>>,
    },
    StopPolling,
    Disconnect,
    Reconnect,
}

/// Client side of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<VehicleSnapshot>,
}

impl SessionHandle {
    /// Connection state feed
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Vehicle snapshot feed
    pub fn snapshot(&self) -> watch::Receiver<VehicleSnapshot> {
        self.snapshot.clone()
    }

    pub fn current_snapshot(&self) -> VehicleSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait until the connection state satisfies `predicate`
    pub async fn wait_for_state(
        &self,
        mut predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, ObdError> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ObdError::SessionClosed)?
            .clone();
        Ok(matched)
    }

    /// Request one parameter, serialized with the polling traffic
    pub async fn request_parameter(&self, id: &str) -> Result<DecodedResponse, ObdError> {
        let (responder, response) = oneshot::channel();
        self.send(SessionCommand::Request {
            id: id.to_string(),
            responder,
        })
        .await?;
        response.await.map_err(|_| ObdError::SessionClosed)?
    }

    /// Enable working-set polling; fails unless connected
    pub async fn start_polling(&self) -> Result<(), ObdError> {
        let (responder, result) = oneshot::channel();
        self.send(SessionCommand::StartPolling { responder }).await?;
        result.await.map_err(|_| ObdError::SessionClosed)?
    }

    pub async fn stop_polling(&self) -> Result<(), ObdError> {
        self.send(SessionCommand::StopPolling).await
    }

    /// Tear down the protocol state; the transport stays open
    pub async fn disconnect(&self) -> Result<(), ObdError> {
        self.send(SessionCommand::Disconnect).await
    }

    /// Re-run adapter initialization on the same transport
    pub async fn reconnect(&self) -> Result<(), ObdError> {
        self.send(SessionCommand::Reconnect).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), ObdError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ObdError::SessionClosed)
    }
}

/// Session actor: the engine plus both halves of the transport
pub struct ObdSession<R, W> {
    engine: ObdEngine,
    reader: R,
    writer: W,
    commands: mpsc::Receiver<SessionCommand>,
}

impl<R, W> ObdSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a session and its first handle
    pub fn new(engine: ObdEngine, reader: R, writer: W) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let handle = SessionHandle {
            commands: tx,
            state: engine.subscribe_state(),
            snapshot: engine.subscribe_snapshot(),
        };
        let session = Self {
            engine,
            reader,
            writer,
            commands: rx,
        };
        (session, handle)
    }

    /// Spawn the session on the current runtime
    pub fn spawn(
        engine: ObdEngine,
        reader: R,
        writer: W,
    ) -> (SessionHandle, JoinHandle<Result<(), ObdError>>)
    where
        R: Send + 'static,
        W: Send + 'static,
    {
        let (session, handle) = Self::new(engine, reader, writer);
        (handle, tokio::spawn(session.run()))
    }

    /// Initialize the adapter and serve until the transport closes or every
    /// handle is dropped
    ///
    /// A transport error ends the session with [`ConnectionState::Failed`].
    pub async fn run(self) -> Result<(), ObdError> {
        let Self {
            mut engine,
            mut reader,
            mut writer,
            mut commands,
        } = self;

        info!("OBD session started");
        engine.connect(Instant::now());

        let mut ticker = time::interval(engine.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let result = loop {
            if let Err(err) = flush(&mut engine, &mut writer).await {
                break Err(err);
            }

            let deadline = engine.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => handle_command(&mut engine, command),
                    None => {
                        info!("All session handles dropped");
                        break Ok(());
                    }
                },
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("Transport closed by adapter");
                        break Ok(());
                    }
                    Ok(n) => engine.receive(&buf[..n], Instant::now()),
                    Err(err) => break Err(ObdError::from(err)),
                },
                _ = ticker.tick() => engine.tick(Instant::now()),
                _ = expiry(deadline) => {
                    engine.check_timeout(Instant::now());
                }
            }
        };

        match &result {
            Ok(()) => engine.disconnect(),
            Err(err) => engine.fail(err.clone()),
        }
        info!("OBD session ended");
        result
    }
}

fn handle_command(engine: &mut ObdEngine, command: SessionCommand) {
    debug!("Session command: {:?}", command);
    let now = Instant::now();
    match command {
        SessionCommand::Request { id, responder } => engine.request_parameter(&id, responder, now),
        SessionCommand::StartPolling { responder } => {
            let _ = responder.send(engine.start_polling());
        }
        SessionCommand::StopPolling => engine.stop_polling(),
        SessionCommand::Disconnect => engine.disconnect(),
        SessionCommand::Reconnect => engine.connect(now),
    }
}

async fn flush<W: AsyncWrite + Unpin>(engine: &mut ObdEngine, writer: &mut W) -> Result<(), ObdError> {
    let mut wrote = false;
    while let Some(bytes) = engine.take_output() {
        writer.write_all(&bytes).await?;
        wrote = true;
    }
    if wrote {
        writer.flush().await?;
    }
    Ok(())
}

async fn expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::connection::ConnectionStateMachine;
    use data_validator::ValidationConfig;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        Send(&'static str),
        Silent,
        Hangup,
    }

    fn healthy(command: &str) -> Reply {
        Reply::Send(match command {
            "ATZ" => "\r\rELM327 v1.5\r\r>",
            "0100" => "41 00 18 7E 80 03\r\r>",
            "0120" => "41 20 00 02 00 01\r\r>",
            "0140" => "41 40 00 00 00 10\r\r>",
            "010C" => "41 0C 0F A0\r\r>",
            "010D" => "41 0D 32\r\r>",
            "010F" => "41 0F 50\r\r>",
            c if c.starts_with("AT") => "OK\r\r>",
            _ => "NO DATA\r\r>",
        })
    }

    fn silent(_: &str) -> Reply {
        Reply::Silent
    }

    fn hangs_up_on_speed(command: &str) -> Reply {
        match command {
            "010D" => Reply::Hangup,
            _ => healthy(command),
        }
    }

    /// Answers each CR-terminated command according to `script`
    async fn fake_adapter(stream: DuplexStream, script: fn(&str) -> Reply) {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\r', &mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let command = String::from_utf8_lossy(&line).trim().to_string();
            match script(&command) {
                Reply::Send(text) => {
                    // split the reply to exercise reassembly
                    let (head, tail) = text.split_at(text.len() / 2);
                    for part in [head, tail] {
                        if writer.write_all(part.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
                Reply::Silent => {}
                Reply::Hangup => return,
            }
        }
    }

    fn start(script: fn(&str) -> Reply) -> (SessionHandle, JoinHandle<Result<(), ObdError>>) {
        let (client, adapter) = tokio::io::duplex(1024);
        tokio::spawn(fake_adapter(adapter, script));
        let (reader, writer) = tokio::io::split(client);
        let engine = ObdEngine::new(
            SessionConfig::default(),
            ValidationConfig::default(),
            ConnectionStateMachine::new(),
        )
        .unwrap();
        ObdSession::spawn(engine, reader, writer)
    }

    async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
        time::timeout(Duration::from_secs(60), future)
            .await
            .expect("timed out")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_polls() {
        let (handle, _task) = start(healthy);
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();

        let mut snapshot = handle.snapshot();
        let ready = within(snapshot.wait_for(|s| s.rpm.is_some() && s.speed.is_some()))
            .await
            .unwrap()
            .clone();
        assert_eq!(ready.rpm, Some(1000.0));
        assert_eq!(ready.speed, Some(50.0));
        assert_eq!(ready.gear, Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_parameter() {
        let (handle, _task) = start(healthy);
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();

        let response = within(handle.request_parameter("0F")).await.unwrap();
        assert_eq!(response.value, Some(40.0));
        assert_eq!(response.raw_bytes, vec![0x50]);

        // 0E is answered with NO DATA
        assert_eq!(
            within(handle.request_parameter("0E")).await,
            Err(ObdError::InvalidResponse("NO DATA".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_are_serialized() {
        let (handle, _task) = start(healthy);
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();
        handle.stop_polling().await.unwrap();

        let (rpm, speed, intake) = within(async {
            tokio::join!(
                handle.request_parameter("0C"),
                handle.request_parameter("0D"),
                handle.request_parameter("0F"),
            )
        })
        .await;
        assert_eq!(rpm.unwrap().value, Some(1000.0));
        assert_eq!(speed.unwrap().value, Some(50.0));
        assert_eq!(intake.unwrap().value, Some(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_adapter_fails_initialization() {
        let (handle, _task) = start(silent);
        assert_eq!(
            handle.request_parameter("0C").await,
            Err(ObdError::NotConnected)
        );
        assert_eq!(handle.start_polling().await, Err(ObdError::NotConnected));

        let state = within(handle.wait_for_state(|s| matches!(s, ConnectionState::Failed(_))))
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Failed(ObdError::InitializationFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_and_reconnect() {
        let (handle, _task) = start(healthy);
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();

        handle.disconnect().await.unwrap();
        within(handle.wait_for_state(|s| *s == ConnectionState::Disconnected))
            .await
            .unwrap();
        // let the reply to the abandoned poll drain before the next handshake
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.current_snapshot(), VehicleSnapshot::default());
        assert_eq!(
            handle.request_parameter("0C").await,
            Err(ObdError::NotConnected)
        );

        handle.reconnect().await.unwrap();
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();
        assert_eq!(within(handle.request_parameter("0C")).await.unwrap().value, Some(1000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_eof_ends_session() {
        let (handle, task) = start(hangs_up_on_speed);
        assert_eq!(within(task).await.unwrap(), Ok(()));
        assert_eq!(handle.current_state(), ConnectionState::Disconnected);
        assert_eq!(
            handle.request_parameter("0C").await,
            Err(ObdError::SessionClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_ends_session() {
        let (handle, task) = start(healthy);
        within(handle.wait_for_state(|s| s.is_connected()))
            .await
            .unwrap();
        drop(handle);
        assert_eq!(within(task).await.unwrap(), Ok(()));
    }
}
