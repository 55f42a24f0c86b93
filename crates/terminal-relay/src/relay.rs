// SPDX-License-Identifier: AGPL-3.0-only
//! The per-session relay state machine.
//!
//! A session walks `Handshaking -> Authenticated -> Connecting -> Streaming
//! -> Closing -> Closed`. Requests refused before `Connecting` never create a
//! session; once a session exists every exit path goes through the same
//! teardown, which closes the device link, writes the closing audit entry and
//! drops the registry entry, each independently of the others.

use crate::accounting::SessionAccounting;
use crate::command::{CaptureMode, CommandDetector};
use crate::credentials::DeviceCredentials;
use crate::device::{Device, DeviceDirectory, TokenClaims, TokenVerifier};
use crate::error::{FrameError, RelayError};
use crate::frame::{ClientFrame, ServerFrame, WindowSize};
use crate::registry::SessionRegistry;
use crate::session::{Protocol, RelaySession, RelayState, SessionId};
use crate::transport::{DeviceConnector, DeviceControl, DeviceLink};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use warden_auth::{AccessKind, AccessRecord, AccessStatus, AuditSink, CommandRecord, Identity, UserStore};

const CTRL_U: u8 = 0x15;

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub capture: CaptureMode,
    /// Authorize each typed command with TACACS+ before it is executed.
    pub authorize_commands: bool,
    pub initial_size: WindowSize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        RelaySettings {
            capture: CaptureMode::Keystrokes,
            authorize_commands: false,
            initial_size: WindowSize::default(),
        }
    }
}

/// Collaborators the relay depends on.
pub struct RelayDeps {
    pub tokens: Arc<dyn TokenVerifier>,
    pub users: Arc<dyn UserStore>,
    pub devices: Arc<dyn DeviceDirectory>,
    pub credentials: Arc<dyn DeviceCredentials>,
    pub connector: Arc<dyn DeviceConnector>,
    pub audit: Arc<dyn AuditSink>,
    pub accounting: Arc<dyn SessionAccounting>,
}

/// Connection parameters as received from the client.
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    pub token: Option<String>,
    pub device_id: Option<String>,
    pub protocol: Option<String>,
    pub peer: String,
}

/// The client side of a session: decoded inbound frames, outbound frames.
/// Dropping the inbound sender means the client went away.
pub struct ClientLink {
    pub inbound: mpsc::Receiver<Result<ClientFrame, FrameError>>,
    pub outbound: mpsc::Sender<ServerFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    DeviceClosed,
    Shutdown,
    Failed,
}

impl CloseReason {
    fn describe(self, protocol: Protocol) -> String {
        match self {
            CloseReason::ClientClosed => "Client disconnected".to_string(),
            CloseReason::DeviceClosed => format!("{} session closed by remote host", protocol.label()),
            CloseReason::Shutdown => "Server shutting down".to_string(),
            CloseReason::Failed => "Session failed".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub session_id: Option<SessionId>,
    pub states: Vec<RelayState>,
    pub close_reason: Option<CloseReason>,
    pub commands: usize,
    pub error: Option<RelayError>,
}

impl RelayOutcome {
    pub fn final_state(&self) -> Option<RelayState> {
        self.states.last().copied()
    }
}

pub struct TerminalRelay {
    deps: RelayDeps,
    settings: RelaySettings,
    registry: Arc<SessionRegistry<RelaySession>>,
}

impl TerminalRelay {
    pub fn new(deps: RelayDeps, settings: RelaySettings) -> TerminalRelay {
        TerminalRelay {
            deps,
            settings,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<RelaySession>> {
        &self.registry
    }

    /// Forces every live session into teardown.
    pub async fn close_all(&self) -> usize {
        self.registry.close_all().await
    }

    /// Drives one client connection to completion.
    #[instrument(skip_all, fields(peer = %request.peer))]
    pub async fn run(&self, request: RelayRequest, client: ClientLink) -> RelayOutcome {
        let mut states = vec![RelayState::Handshaking];
        let ClientLink { mut inbound, outbound } = client;

        let (claims, device_id, protocol) = match self.handshake(&request).await {
            Ok(accepted) => accepted,
            Err(err) => return refuse(states, &outbound, err),
        };
        let identity = match self.identity(&claims).await {
            Ok(identity) => identity,
            Err(err) => return refuse(states, &outbound, err),
        };
        states.push(RelayState::Authenticated);

        let device = match self.admit(device_id, protocol).await {
            Ok(device) => device,
            Err(err) => return refuse(states, &outbound, err),
        };
        if protocol == Protocol::Telnet {
            return refuse(states, &outbound, RelayError::NotImplemented("Telnet"));
        }

        states.push(RelayState::Connecting);
        let session = Arc::new(RelaySession::new(
            identity,
            device,
            protocol,
            request.peer.clone(),
            CommandDetector::new(self.settings.capture),
        ));
        self.registry.put(session.id, Arc::clone(&session));
        let _ = outbound
            .send(ServerFrame::info(format!(
                "Connecting to {} ({}) via {}...",
                session.device.name,
                session.device.address,
                protocol.label()
            )))
            .await;

        let opened = tokio::select! {
            link = self.open_link(&session) => link,
            _ = session.cancelled() => Err(RelayError::Shutdown),
        };
        let link = match opened {
            Ok(link) => link,
            Err(err) => {
                warn!(session = %session.id, device = %session.device.name, error = %err, "device connection failed");
                self.audit_access(&session, AccessKind::Connect(protocol.as_str()), AccessStatus::Failure, err.to_string())
                    .await;
                let _ = outbound.try_send(ServerFrame::error(err.to_string()));
                states.push(RelayState::Closing);
                self.teardown(&session, None, &outbound, CloseReason::Failed, false)
                    .await;
                states.push(RelayState::Closed);
                return RelayOutcome {
                    session_id: Some(session.id),
                    states,
                    close_reason: Some(CloseReason::Failed),
                    commands: 0,
                    error: Some(err),
                };
            }
        };

        states.push(RelayState::Streaming);
        let streamed = self.stream(&session, link, &mut inbound, &outbound).await;

        states.push(RelayState::Closing);
        self.teardown(&session, Some(streamed.control), &outbound, streamed.reason, true)
            .await;
        states.push(RelayState::Closed);
        RelayOutcome {
            session_id: Some(session.id),
            states,
            close_reason: Some(streamed.reason),
            commands: streamed.commands,
            error: streamed.error,
        }
    }

    async fn handshake(&self, request: &RelayRequest) -> Result<(TokenClaims, i64, Protocol), RelayError> {
        let (Some(token), Some(device_id)) = (
            request.token.as_deref().filter(|t| !t.is_empty()),
            request.device_id.as_deref().filter(|d| !d.is_empty()),
        ) else {
            return Err(RelayError::MissingParameter);
        };
        let device_id = device_id
            .parse::<i64>()
            .map_err(|_| RelayError::InvalidDeviceId(device_id.to_string()))?;
        let protocol = match request.protocol.as_deref() {
            None | Some("") => Protocol::Ssh,
            Some(raw) => raw.parse().map_err(RelayError::UnknownProtocol)?,
        };
        let claims = self
            .deps
            .tokens
            .verify(token)
            .await
            .ok_or(RelayError::InvalidToken)?;
        Ok((claims, device_id, protocol))
    }

    async fn identity(&self, claims: &TokenClaims) -> Result<Identity, RelayError> {
        let user = self
            .deps
            .users
            .find_by_id(claims.user_id)
            .await?
            .ok_or(RelayError::NotFound)?;
        if !user.is_active {
            return Err(RelayError::InactiveUser);
        }
        Ok(user.identity(claims.origin))
    }

    async fn admit(&self, device_id: i64, protocol: Protocol) -> Result<Device, RelayError> {
        let device = self
            .deps
            .devices
            .device(device_id)
            .await?
            .ok_or(RelayError::NotFound)?;
        if !device.is_online() {
            return Err(RelayError::DeviceOffline(device.name));
        }
        if !device.supports(protocol) {
            return Err(RelayError::ProtocolUnsupported {
                device: device.name,
                protocol: protocol.label(),
            });
        }
        Ok(device)
    }

    async fn open_link(&self, session: &RelaySession) -> Result<DeviceLink, RelayError> {
        let login = self
            .deps
            .credentials
            .credentials_for(&session.identity, &session.device)
            .await?
            .ok_or_else(|| RelayError::NoCredentials(session.device.name.clone()))?;
        self.deps
            .connector
            .connect(&session.device, &login, self.settings.initial_size)
            .await
    }

    /// Runs both directions until one side closes, the client misbehaves or
    /// the session is cancelled.
    async fn stream(
        &self,
        session: &Arc<RelaySession>,
        link: DeviceLink,
        inbound: &mut mpsc::Receiver<Result<ClientFrame, FrameError>>,
        outbound: &mpsc::Sender<ServerFrame>,
    ) -> Streamed {
        let DeviceLink { mut output, control } = link;
        let protocol = session.protocol;
        let _ = outbound
            .send(ServerFrame::Connected {
                session_id: session.id.to_string(),
            })
            .await;
        let _ = outbound
            .send(ServerFrame::info(format!(
                "{} connection established with {}",
                protocol.label(),
                session.device.name
            )))
            .await;
        self.audit_access(
            session,
            AccessKind::Connect(protocol.as_str()),
            AccessStatus::Success,
            format!("{} session to {}", protocol.label(), session.device.target()),
        )
        .await;
        info!(session = %session.id, device = %session.device.name, user = %session.identity.principal, "relay session streaming");

        let accounting = Arc::clone(&self.deps.accounting);
        let started = Arc::clone(session);
        tokio::spawn(async move {
            let id = started.id.to_string();
            if let Err(err) = accounting
                .session_started(&started.identity, &started.device.address, &id)
                .await
            {
                warn!(session = %id, error = %err, "session start accounting failed");
            }
        });

        let tacacs = self.deps.accounting.command_accounting_enabled().await;
        let authorize = self.settings.authorize_commands && tacacs && session.detector.mode() == CaptureMode::Keystrokes;
        let commands = CommandLog::spawn(
            Arc::clone(&self.deps.audit),
            Arc::clone(&self.deps.accounting),
            Arc::clone(session),
            tacacs,
        );

        let result = tokio::select! {
            r = device_to_client(session, &mut output, outbound, &commands) => r,
            r = self.client_to_device(session, inbound, &control, outbound, &commands, authorize) => r,
            _ = session.cancelled() => Ok(CloseReason::Shutdown),
        };
        let (reason, error) = match result {
            Ok(reason) => (reason, None),
            Err(err) => {
                warn!(session = %session.id, error = %err, "relay session aborted");
                let _ = outbound.try_send(ServerFrame::error(err.to_string()));
                (CloseReason::Failed, Some(err))
            }
        };
        Streamed {
            reason,
            control,
            error,
            commands: commands.finish().await,
        }
    }

    async fn client_to_device(
        &self,
        session: &RelaySession,
        inbound: &mut mpsc::Receiver<Result<ClientFrame, FrameError>>,
        control: &DeviceControl,
        outbound: &mpsc::Sender<ServerFrame>,
        commands: &CommandLog,
        authorize: bool,
    ) -> Result<CloseReason, RelayError> {
        loop {
            let Some(frame) = inbound.recv().await else {
                return Ok(CloseReason::ClientClosed);
            };
            match frame? {
                ClientFrame::Resize(size) => control.resize(size).await?,
                ClientFrame::Data(bytes) if authorize => {
                    self.forward_authorized(session, bytes, control, outbound, commands)
                        .await?
                }
                ClientFrame::Data(bytes) => {
                    let found = session.detector.feed_client(&bytes);
                    control.send(bytes).await?;
                    commands.submit(found);
                }
            }
        }
    }

    /// Holds back each line terminator until the line it completes has been
    /// authorized. A denied line is erased on the device with Ctrl-U.
    async fn forward_authorized(
        &self,
        session: &RelaySession,
        bytes: Vec<u8>,
        control: &DeviceControl,
        outbound: &mpsc::Sender<ServerFrame>,
        commands: &CommandLog,
    ) -> Result<(), RelayError> {
        let mut rest: &[u8] = &bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\r' || *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            let (terminator, after) = tail.split_at(1);
            session.detector.feed_client(head);
            control.send(head.to_vec()).await?;
            rest = after;

            if let Some(command) = session.detector.pending_line() {
                if let Some(denial) = self.denied(session, &command).await {
                    session.detector.discard_line();
                    control.send(vec![CTRL_U]).await?;
                    let _ = outbound.send(ServerFrame::error(denial)).await;
                    continue;
                }
            }
            commands.submit(session.detector.feed_client(terminator));
            control.send(terminator.to_vec()).await?;
        }
        session.detector.feed_client(rest);
        control.send(rest.to_vec()).await
    }

    /// `Some(message)` when the command must not run. Authorization errors deny.
    async fn denied(&self, session: &RelaySession, command: &str) -> Option<String> {
        match self
            .deps
            .accounting
            .authorize_command(&session.identity, &session.device.address, command)
            .await
        {
            Ok(verdict) if verdict.authorized => None,
            Ok(verdict) => {
                info!(session = %session.id, user = %session.identity.principal, command, "command denied");
                Some(if verdict.message.is_empty() {
                    format!("Command not authorized: {command}")
                } else {
                    format!("Command not authorized: {command} ({})", verdict.message)
                })
            }
            Err(err) => {
                warn!(session = %session.id, command, error = %err, "command authorization failed");
                Some(format!("Command authorization unavailable: {command}"))
            }
        }
    }

    async fn teardown(
        &self,
        session: &Arc<RelaySession>,
        control: Option<DeviceControl>,
        outbound: &mpsc::Sender<ServerFrame>,
        reason: CloseReason,
        streamed: bool,
    ) {
        if let Some(control) = control {
            control.close().await;
        }

        let elapsed = session.elapsed_secs();
        self.audit_access(
            session,
            AccessKind::Disconnect(session.protocol.as_str()),
            AccessStatus::Success,
            format!("Session duration: {elapsed} seconds"),
        )
        .await;

        self.registry.remove(&session.id);

        if streamed {
            let accounting = Arc::clone(&self.deps.accounting);
            let stopped = Arc::clone(session);
            tokio::spawn(async move {
                let id = stopped.id.to_string();
                if let Err(err) = accounting
                    .session_stopped(&stopped.identity, &stopped.device.address, &id, elapsed)
                    .await
                {
                    warn!(session = %id, error = %err, "session stop accounting failed");
                }
            });
        }

        let _ = outbound.try_send(ServerFrame::Closed {
            reason: reason.describe(session.protocol),
        });
        info!(
            session = %session.id,
            device = %session.device.name,
            user = %session.identity.principal,
            elapsed,
            ?reason,
            "relay session closed"
        );
    }

    async fn audit_access(&self, session: &RelaySession, kind: AccessKind, status: AccessStatus, details: String) {
        let record = AccessRecord::new(kind, status, session.peer.clone())
            .user(session.identity.user_id)
            .device(session.device.id)
            .details(details);
        if let Err(err) = self.deps.audit.record_access(record).await {
            warn!(session = %session.id, error = %err, "failed to write access record");
        }
    }
}

fn refuse(mut states: Vec<RelayState>, outbound: &mpsc::Sender<ServerFrame>, err: RelayError) -> RelayOutcome {
    debug!(error = %err, "relay request refused");
    let _ = outbound.try_send(ServerFrame::error(err.to_string()));
    states.push(RelayState::Closed);
    RelayOutcome {
        session_id: None,
        states,
        close_reason: None,
        commands: 0,
        error: Some(err),
    }
}

async fn device_to_client(
    session: &RelaySession,
    output: &mut mpsc::Receiver<Vec<u8>>,
    outbound: &mpsc::Sender<ServerFrame>,
    commands: &CommandLog,
) -> Result<CloseReason, RelayError> {
    while let Some(bytes) = output.recv().await {
        commands.submit(session.detector.feed_device(&bytes));
        if outbound.send(ServerFrame::Data(bytes)).await.is_err() {
            return Ok(CloseReason::ClientClosed);
        }
    }
    Ok(CloseReason::DeviceClosed)
}

/// How the streaming phase ended. Carries the device control half so the
/// caller closes it exactly once.
struct Streamed {
    reason: CloseReason,
    control: DeviceControl,
    error: Option<RelayError>,
    commands: usize,
}

/// Persists detected commands in detection order off the relay path, and
/// forwards each to TACACS+ accounting without waiting on it.
struct CommandLog {
    tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
    count: AtomicUsize,
}

impl CommandLog {
    fn spawn(
        audit: Arc<dyn AuditSink>,
        accounting: Arc<dyn SessionAccounting>,
        session: Arc<RelaySession>,
        tacacs: bool,
    ) -> CommandLog {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                let record = CommandRecord {
                    user_id: session.identity.user_id,
                    device_id: session.device.id,
                    command: command.clone(),
                    executed_at: OffsetDateTime::now_utc(),
                };
                if let Err(err) = audit.record_command(record).await {
                    warn!(session = %session.id, error = %err, "failed to write command record");
                }
                if tacacs {
                    let accounting = Arc::clone(&accounting);
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        if let Err(err) = accounting
                            .log_command(&session.identity, &session.device.address, &command, true)
                            .await
                        {
                            warn!(session = %session.id, error = %err, "TACACS+ command accounting failed");
                        }
                    });
                }
            }
        });
        CommandLog {
            tx,
            task,
            count: AtomicUsize::new(0),
        }
    }

    fn submit(&self, commands: Vec<String>) {
        for command in commands {
            debug!(command, "command detected");
            self.count.fetch_add(1, Ordering::Relaxed);
            let _ = self.tx.send(command);
        }
    }

    /// Waits until every submitted command has been persisted.
    async fn finish(self) -> usize {
        let CommandLog { tx, task, count } = self;
        drop(tx);
        if let Err(err) = task.await {
            warn!(error = %err, "command log task failed");
        }
        count.into_inner()
    }
}
