// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ backend: PAP authentication, command authorization and command
//! accounting, one TCP connection per exchange.

use crate::config::TacacsConfig;
use crate::error::BackendError;
use crate::health::HealthStatus;
use crate::identity::{BackendAnswer, BackendKind};
use secrecy::ExposeSecret;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use warden_tacacs_proto::client;
use warden_tacacs_proto::{
    ACCT_FLAG_STOP, AUTHOR_STATUS_ERROR, AUTHOR_STATUS_FAIL, AccountingRequest, AuthenReply, AuthenStart,
    AuthenStatus, AuthorizationRequest,
};

const BACKEND: BackendKind = BackendKind::Tacacs;

/// Address reported as the PAP client; logins arrive through this process.
const LOCAL_ADDR: &str = "127.0.0.1";

/// Room left for the command in a `cmd=` accounting attribute.
const MAX_CMD_LEN: usize = 255 - "cmd=".len();

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandAuthorization {
    pub authorized: bool,
    pub message: String,
}

#[derive(Default)]
pub struct TacacsClient {
    config: RwLock<Option<Arc<TacacsConfig>>>,
}

impl TacacsClient {
    pub fn new() -> TacacsClient {
        TacacsClient::default()
    }

    pub async fn is_ready(&self) -> bool {
        self.config.read().await.is_some()
    }

    /// Installs the configuration. No connection is opened until first use.
    pub async fn initialize(&self, config: TacacsConfig) {
        info!(host = %config.host, port = config.port, "TACACS+ client initialized");
        *self.config.write().await = Some(Arc::new(config));
    }

    pub async fn shutdown(&self) {
        if self.config.write().await.take().is_some() {
            debug!("TACACS+ client shut down");
        }
    }

    async fn config(&self) -> Result<Arc<TacacsConfig>, BackendError> {
        self.config
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotInitialized(BACKEND))
    }

    #[instrument(skip(self, secret))]
    pub async fn authenticate(&self, principal: &str, secret: &str) -> Result<BackendAnswer, BackendError> {
        let cfg = self.config().await?;
        let start = AuthenStart::pap(principal, secret)
            .with_port(&cfg.application_name)
            .with_rem_addr(LOCAL_ADDR);
        let reply = authen(&cfg, cfg.timeout, &start).await?;
        match reply.status() {
            AuthenStatus::Pass => Ok(BackendAnswer::accept().with_message(reply.server_msg)),
            AuthenStatus::Fail => {
                debug!(server_msg = %reply.server_msg, "TACACS+ rejected credential");
                Ok(BackendAnswer::reject().with_message(reply.server_msg))
            }
            AuthenStatus::Error => Err(BackendError::Server {
                backend: BACKEND,
                message: non_empty(reply.server_msg, "authentication error"),
            }),
            other => Err(BackendError::Protocol {
                backend: BACKEND,
                message: format!("unexpected PAP reply status {other:?}"),
            }),
        }
    }

    /// Asks the server whether `principal` may run `command` on the device.
    #[instrument(skip(self))]
    pub async fn authorize_command(
        &self,
        principal: &str,
        device_address: &str,
        command: &str,
    ) -> Result<CommandAuthorization, BackendError> {
        let cfg = self.config().await?;
        let request = AuthorizationRequest::builder(principal)
            .with_port(&cfg.application_name)
            .with_rem_addr(device_address)
            .shell_command("ssh", command);
        let response = bounded(cfg.timeout, async {
            let mut stream = connect(&cfg).await?;
            let session_id = client::new_session_id().map_err(exchange_error)?;
            client::authorize(&mut stream, session_id, &request, cfg.secret.expose_secret().as_bytes())
                .await
                .map_err(exchange_error)
        })
        .await?;

        if response.is_permitted() {
            return Ok(CommandAuthorization {
                authorized: true,
                message: response.server_msg,
            });
        }
        match response.status {
            AUTHOR_STATUS_FAIL => Ok(CommandAuthorization {
                authorized: false,
                message: response.server_msg,
            }),
            AUTHOR_STATUS_ERROR => Err(BackendError::Server {
                backend: BACKEND,
                message: non_empty(response.server_msg, "authorization error"),
            }),
            other => Err(BackendError::Protocol {
                backend: BACKEND,
                message: format!("unexpected authorization status {other:#04x}"),
            }),
        }
    }

    /// Sends one STOP accounting record describing an executed command.
    #[instrument(skip(self))]
    pub async fn log_command(
        &self,
        principal: &str,
        device_address: &str,
        command: &str,
        success: bool,
    ) -> Result<(), BackendError> {
        let cfg = self.config().await?;
        let now = OffsetDateTime::now_utc();
        let task_id = now.unix_timestamp_nanos() / 1_000_000;
        let mut request = AccountingRequest::new(ACCT_FLAG_STOP, principal)
            .with_port(&cfg.application_name)
            .with_rem_addr(device_address)
            .add_arg("task_id", task_id)
            .add_arg("start_time", now.unix_timestamp())
            .add_arg("stop_time", now.unix_timestamp())
            .add_arg("elapsed_time", 0)
            .add_arg("service", "shell")
            .add_arg("protocol", "ssh")
            .add_arg("cmd", truncate_utf8(command, MAX_CMD_LEN));
        if !success {
            request = request.add_arg("err_msg", "command failed");
        }
        let reply = bounded(cfg.timeout, async {
            let mut stream = connect(&cfg).await?;
            let session_id = client::new_session_id().map_err(exchange_error)?;
            client::account(&mut stream, session_id, &request, cfg.secret.expose_secret().as_bytes())
                .await
                .map_err(exchange_error)
        })
        .await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(BackendError::Server {
                backend: BACKEND,
                message: non_empty(reply.server_msg, "accounting record refused"),
            })
        }
    }

    /// Authenticates the probe principal. Any reply, rejection included,
    /// means the server is up.
    pub async fn probe(&self) -> HealthStatus {
        let Ok(cfg) = self.config().await else {
            return HealthStatus::offline("TACACS+ not configured");
        };
        let start = AuthenStart::pap(&cfg.probe_principal, cfg.probe_secret.expose_secret())
            .with_port("status-check")
            .with_rem_addr(LOCAL_ADDR);
        match authen(&cfg, cfg.probe_timeout, &start).await {
            Ok(_) => HealthStatus::online(format!("TACACS+ server {}:{} is operational", cfg.host, cfg.port)),
            Err(err) if err.is_unreachable() => HealthStatus::offline(format!("TACACS+ server not responding: {err}")),
            Err(err) => HealthStatus::online(format!("TACACS+ server answered with an error: {err}")),
        }
    }
}

async fn authen(cfg: &TacacsConfig, limit: Duration, start: &AuthenStart) -> Result<AuthenReply, BackendError> {
    bounded(limit, async {
        let mut stream = connect(cfg).await?;
        let session_id = client::new_session_id().map_err(exchange_error)?;
        client::authenticate(&mut stream, session_id, start, cfg.secret.expose_secret().as_bytes())
            .await
            .map_err(exchange_error)
    })
    .await
}

async fn connect(cfg: &TacacsConfig) -> Result<TcpStream, BackendError> {
    let stream = TcpStream::connect((cfg.host.as_str(), cfg.port))
        .await
        .map_err(|err| BackendError::from_io(BACKEND, err))?;
    stream
        .set_nodelay(true)
        .map_err(|err| BackendError::from_io(BACKEND, err))?;
    Ok(stream)
}

async fn bounded<T>(limit: Duration, op: impl Future<Output = Result<T, BackendError>>) -> Result<T, BackendError> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            backend: BACKEND,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// I/O failures inside the exchange stay transport errors; everything else
/// the codec rejects is a protocol error.
fn exchange_error(err: anyhow::Error) -> BackendError {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<std::io::Error>())
    {
        Some(io) => BackendError::from_io(BACKEND, std::io::Error::new(io.kind(), format!("{err:#}"))),
        None => BackendError::Protocol {
            backend: BACKEND,
            message: format!("{err:#}"),
        },
    }
}

fn non_empty(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn truncate_utf8(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendSettings;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use warden_tacacs_proto::crypto::obfuscate;
    use warden_tacacs_proto::header::{read_header, write_header};
    use warden_tacacs_proto::{
        ACCT_STATUS_ERROR, ACCT_STATUS_SUCCESS, AUTHEN_STATUS_ERROR, AUTHEN_STATUS_FAIL, AUTHEN_STATUS_GETPASS,
        AUTHEN_STATUS_PASS, AUTHOR_STATUS_PASS_ADD, Header, TYPE_ACCT, TYPE_AUTHEN, TYPE_AUTHOR,
        VERSION_MINOR_ONE,
    };

    const SECRET: &str = "tacacs-test-key";

    fn config(port: u16) -> TacacsConfig {
        let map: BackendSettings = [
            ("serverHost", "127.0.0.1".to_string()),
            ("serverPort", port.to_string()),
            ("sharedSecret", SECRET.to_string()),
            ("timeout", "300".to_string()),
            ("probeTimeout", "300".to_string()),
            ("applicationName", "warden-test".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        TacacsConfig::from_settings(&map).unwrap()
    }

    async fn client_for(port: u16) -> TacacsClient {
        let client = TacacsClient::new();
        client.initialize(config(port)).await;
        client
    }

    /// Accepts one connection, answers one request with `respond`, and yields
    /// the request header and plaintext body.
    async fn fake_server<F>(respond: F) -> (u16, JoinHandle<(Header, Vec<u8>)>)
    where
        F: FnOnce(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_header(&mut sock).await.unwrap();
            let mut body = vec![0u8; request.length as usize];
            sock.read_exact(&mut body).await.unwrap();
            obfuscate(&request, &mut body, SECRET.as_bytes()).unwrap();

            let mut reply_body = respond(&body);
            let reply = Header {
                seq_no: request.seq_no + 1,
                length: reply_body.len() as u32,
                ..request.clone()
            };
            obfuscate(&reply, &mut reply_body, SECRET.as_bytes()).unwrap();
            write_header(&mut sock, &reply).await.unwrap();
            sock.write_all(&reply_body).await.unwrap();
            (request, body)
        });
        (port, handle)
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        (port, handle)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn authen_reply(status: u8, msg: &str) -> Vec<u8> {
        let mut body = vec![status, 0];
        body.extend_from_slice(&(msg.len() as u16).to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(msg.as_bytes());
        body
    }

    fn author_reply(status: u8, msg: &str) -> Vec<u8> {
        let mut body = vec![status, 0];
        body.extend_from_slice(&(msg.len() as u16).to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(msg.as_bytes());
        body
    }

    fn acct_reply(status: u8) -> Vec<u8> {
        vec![0, 0, 0, 0, status]
    }

    /// Fields of an authorization (`len_at` = 4) or accounting (`len_at` = 5)
    /// request body: (user, port, rem_addr, args).
    fn request_fields(body: &[u8], len_at: usize) -> (String, String, String, Vec<String>) {
        let user_len = body[len_at] as usize;
        let port_len = body[len_at + 1] as usize;
        let rem_len = body[len_at + 2] as usize;
        let arg_cnt = body[len_at + 3] as usize;
        let arg_lens = &body[len_at + 4..len_at + 4 + arg_cnt];
        let mut cursor = len_at + 4 + arg_cnt;
        let mut take = |len: usize| {
            let s = String::from_utf8(body[cursor..cursor + len].to_vec()).unwrap();
            cursor += len;
            s
        };
        let user = take(user_len);
        let port = take(port_len);
        let rem = take(rem_len);
        let args = arg_lens.iter().map(|len| take(*len as usize)).collect();
        (user, port, rem, args)
    }

    // ==================== Authentication Tests ====================

    #[tokio::test]
    async fn uninitialized_client_fails_without_network() {
        let client = TacacsClient::new();
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::NotInitialized(BackendKind::Tacacs)));
        assert!(client.log_command("alice", "10.0.0.1", "show", true).await.is_err());
    }

    #[tokio::test]
    async fn pass_reply_accepts() {
        let (port, server) = fake_server(|_| authen_reply(AUTHEN_STATUS_PASS, "")).await;
        let client = client_for(port).await;

        let answer = client.authenticate("alice", "s3cret").await.unwrap();
        assert!(answer.accepted);

        let (header, body) = server.await.unwrap();
        assert_eq!(header.packet_type, TYPE_AUTHEN);
        assert_eq!(header.version, VERSION_MINOR_ONE);
        assert_ne!(header.session_id, 0);
        assert_eq!(&body[8..13], b"alice");
        assert_eq!(&body[13..24], b"warden-test");
        assert!(body.ends_with(b"s3cret"));
    }

    #[tokio::test]
    async fn fail_reply_rejects_with_message() {
        let (port, _server) = fake_server(|_| authen_reply(AUTHEN_STATUS_FAIL, "bad password")).await;
        let client = client_for(port).await;

        let answer = client.authenticate("alice", "nope").await.unwrap();
        assert!(!answer.accepted);
        assert_eq!(answer.message.as_deref(), Some("bad password"));
    }

    #[tokio::test]
    async fn error_reply_is_not_a_rejection() {
        let (port, _server) = fake_server(|_| authen_reply(AUTHEN_STATUS_ERROR, "")).await;
        let client = client_for(port).await;
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Server { .. }));
    }

    #[tokio::test]
    async fn interactive_reply_is_a_protocol_error() {
        let (port, _server) = fake_server(|_| authen_reply(AUTHEN_STATUS_GETPASS, "Password:")).await;
        let client = client_for(port).await;
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol { .. }));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (port, _server) = silent_server().await;
        let client = client_for(port).await;

        let started = std::time::Instant::now();
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { timeout_ms: 300, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn refused_connection_is_surfaced() {
        let client = client_for(closed_port().await).await;
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Refused { .. }));
    }

    #[tokio::test]
    async fn shutdown_returns_to_uninitialized() {
        let client = client_for(49).await;
        assert!(client.is_ready().await);
        client.shutdown().await;
        assert!(!client.is_ready().await);
    }

    // ==================== Authorization Tests ====================

    #[tokio::test]
    async fn permitted_command() {
        let (port, server) = fake_server(|_| author_reply(AUTHOR_STATUS_PASS_ADD, "")).await;
        let client = client_for(port).await;

        let verdict = client
            .authorize_command("alice", "10.0.0.9", "show ip route")
            .await
            .unwrap();
        assert!(verdict.authorized);

        let (header, body) = server.await.unwrap();
        assert_eq!(header.packet_type, TYPE_AUTHOR);
        let (user, port, rem, args) = request_fields(&body, 4);
        assert_eq!(user, "alice");
        assert_eq!(port, "warden-test");
        assert_eq!(rem, "10.0.0.9");
        assert_eq!(
            args,
            vec!["service=shell", "protocol=ssh", "cmd=show", "cmd-arg=ip", "cmd-arg=route"]
        );
    }

    #[tokio::test]
    async fn denied_command_carries_message() {
        let (port, _server) = fake_server(|_| author_reply(AUTHOR_STATUS_FAIL, "not allowed")).await;
        let client = client_for(port).await;
        let verdict = client.authorize_command("alice", "10.0.0.9", "reload").await.unwrap();
        assert_eq!(
            verdict,
            CommandAuthorization {
                authorized: false,
                message: "not allowed".into()
            }
        );
    }

    #[tokio::test]
    async fn authorization_error_status_is_an_error() {
        let (port, _server) = fake_server(|_| author_reply(AUTHOR_STATUS_ERROR, "")).await;
        let client = client_for(port).await;
        assert!(client.authorize_command("alice", "10.0.0.9", "reload").await.is_err());
    }

    // ==================== Accounting Tests ====================

    #[tokio::test]
    async fn command_is_logged_as_stop_record() {
        let (port, server) = fake_server(|_| acct_reply(ACCT_STATUS_SUCCESS)).await;
        let client = client_for(port).await;
        client
            .log_command("alice", "10.0.0.9", "show version", true)
            .await
            .unwrap();

        let (header, body) = server.await.unwrap();
        assert_eq!(header.packet_type, TYPE_ACCT);
        assert_eq!(body[0], ACCT_FLAG_STOP);
        let (user, _, rem, args) = request_fields(&body, 5);
        assert_eq!(user, "alice");
        assert_eq!(rem, "10.0.0.9");
        assert!(args[0].starts_with("task_id="));
        assert!(args.contains(&"service=shell".to_string()));
        assert!(args.contains(&"cmd=show version".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("err_msg=")));
    }

    #[tokio::test]
    async fn failed_command_and_long_command_are_logged() {
        let (port, server) = fake_server(|_| acct_reply(ACCT_STATUS_SUCCESS)).await;
        let client = client_for(port).await;
        let long = "x".repeat(400);
        client.log_command("alice", "10.0.0.9", &long, false).await.unwrap();

        let (_, body) = server.await.unwrap();
        let (_, _, _, args) = request_fields(&body, 5);
        let cmd = args.iter().find(|a| a.starts_with("cmd=")).unwrap();
        assert_eq!(cmd.len(), 255);
        assert!(args.contains(&"err_msg=command failed".to_string()));
    }

    #[tokio::test]
    async fn refused_accounting_record_is_an_error() {
        let (port, _server) = fake_server(|_| acct_reply(ACCT_STATUS_ERROR)).await;
        let client = client_for(port).await;
        let err = client
            .log_command("alice", "10.0.0.9", "show version", true)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Server { .. }));
    }

    // ==================== Probe Tests ====================

    #[tokio::test]
    async fn probe_rejection_means_online() {
        let (port, server) = fake_server(|_| authen_reply(AUTHEN_STATUS_FAIL, "")).await;
        let client = client_for(port).await;
        assert_eq!(client.probe().await.status, crate::health::HealthState::Online);
        let (_, body) = server.await.unwrap();
        assert_eq!(&body[8..13], b"probe");
    }

    #[tokio::test]
    async fn probe_unreachable_means_offline() {
        let client = client_for(closed_port().await).await;
        assert_eq!(client.probe().await.status, crate::health::HealthState::Offline);

        let (port, _server) = silent_server().await;
        let client = client_for(port).await;
        assert_eq!(client.probe().await.status, crate::health::HealthState::Offline);
    }

    #[tokio::test]
    async fn probe_without_config_is_offline() {
        assert_eq!(
            TacacsClient::new().probe().await.status,
            crate::health::HealthState::Offline
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("héllo", 2), "h");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }
}
