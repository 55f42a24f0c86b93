// SPDX-License-Identifier: AGPL-3.0-only
//! RADIUS backend: Access-Request authentication and session accounting over
//! UDP, one datagram out and exactly one back.

use crate::config::RadiusConfig;
use crate::error::BackendError;
use crate::health::HealthStatus;
use crate::identity::{BackendAnswer, BackendKind};
use secrecy::ExposeSecret;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use warden_radius_proto::attribute::{
    ACCT_AUTHENTIC, ACCT_SESSION_ID, ACCT_SESSION_TIME, ACCT_STATUS_TYPE, CALLING_STATION_ID, CLASS,
    NAS_IDENTIFIER, NAS_IP_ADDRESS, USER_NAME,
};
use warden_radius_proto::crypto::random_identifier;
use warden_radius_proto::{
    ACCT_AUTHENTIC_RADIUS, ACCT_STATUS_START, ACCT_STATUS_STOP, Attribute, Code, MAX_PACKET_LEN, Packet,
};

const BACKEND: BackendKind = BackendKind::Radius;

#[derive(Default)]
pub struct RadiusClient {
    config: RwLock<Option<Arc<RadiusConfig>>>,
}

impl RadiusClient {
    pub fn new() -> RadiusClient {
        RadiusClient::default()
    }

    pub async fn is_ready(&self) -> bool {
        self.config.read().await.is_some()
    }

    pub async fn initialize(&self, config: RadiusConfig) {
        info!(
            host = %config.host,
            port = config.port,
            accounting_port = config.accounting_port,
            "RADIUS client initialized"
        );
        *self.config.write().await = Some(Arc::new(config));
    }

    pub async fn shutdown(&self) {
        if self.config.write().await.take().is_some() {
            debug!("RADIUS client shut down");
        }
    }

    async fn config(&self) -> Result<Arc<RadiusConfig>, BackendError> {
        self.config
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotInitialized(BACKEND))
    }

    /// Access-Accept accepts; Access-Reject and Access-Challenge reject.
    #[instrument(skip(self, secret))]
    pub async fn authenticate(&self, principal: &str, secret: &str) -> Result<BackendAnswer, BackendError> {
        let cfg = self.config().await?;
        let reply = access(&cfg, cfg.timeout, principal, secret).await?;
        let message = reply.reply_message().unwrap_or_default();
        match reply.code {
            Code::AccessAccept => {
                let mut answer = BackendAnswer::accept().with_message(message);
                answer.attributes = reply
                    .attributes
                    .iter()
                    .filter(|a| a.typ == CLASS)
                    .filter_map(|a| a.as_text().ok())
                    .map(|class| ("class".to_string(), class))
                    .collect();
                Ok(answer)
            }
            Code::AccessReject | Code::AccessChallenge => {
                debug!(code = ?reply.code, "RADIUS rejected credential");
                Ok(BackendAnswer::reject().with_message(message))
            }
            other => Err(protocol(format!("unexpected {other:?} in reply to Access-Request"))),
        }
    }

    #[instrument(skip(self))]
    pub async fn start_accounting(
        &self,
        principal: &str,
        device_address: &str,
        session_id: &str,
    ) -> Result<(), BackendError> {
        let cfg = self.config().await?;
        let packet = accounting_packet(&cfg, ACCT_STATUS_START, principal, device_address, session_id)?;
        account(&cfg, &packet).await
    }

    #[instrument(skip(self))]
    pub async fn stop_accounting(
        &self,
        principal: &str,
        device_address: &str,
        session_id: &str,
        duration_secs: u64,
    ) -> Result<(), BackendError> {
        let cfg = self.config().await?;
        let session_time = u32::try_from(duration_secs).unwrap_or(u32::MAX);
        let packet = accounting_packet(&cfg, ACCT_STATUS_STOP, principal, device_address, session_id)?
            .with_attribute(Attribute::integer(ACCT_SESSION_TIME, session_time));
        account(&cfg, &packet).await
    }

    /// Any verified reply means online; silence or refusal means offline; a
    /// reply that fails verification means degraded.
    pub async fn probe(&self) -> HealthStatus {
        let Ok(cfg) = self.config().await else {
            return HealthStatus::offline("RADIUS not configured");
        };
        match access(&cfg, cfg.probe_timeout, &cfg.probe_principal, cfg.probe_secret.expose_secret()).await {
            Ok(_) => HealthStatus::online(format!("RADIUS server {}:{} is operational", cfg.host, cfg.port)),
            Err(err @ (BackendError::Timeout { .. } | BackendError::Refused { .. })) => {
                HealthStatus::offline(format!("RADIUS server not responding: {err}"))
            }
            Err(err @ BackendError::Protocol { .. }) => {
                HealthStatus::degraded(format!("RADIUS server answered but the reply was invalid: {err}"))
            }
            Err(err) => HealthStatus::error(format!("RADIUS probe failed: {err}")),
        }
    }
}

async fn access(cfg: &RadiusConfig, limit: Duration, principal: &str, secret: &str) -> Result<Packet, BackendError> {
    let identifier = random_identifier().map_err(|e| protocol(format!("{e:#}")))?;
    let packet = Packet::access_request(identifier, principal, secret.as_bytes(), cfg.secret.expose_secret().as_bytes())
        .map_err(|e| protocol(format!("{e:#}")))?
        .with_attribute(Attribute::ipv4(NAS_IP_ADDRESS, cfg.nas_ip_address))
        .with_attribute(Attribute::text(NAS_IDENTIFIER, &cfg.nas_identifier));
    exchange(cfg, cfg.port, limit, &packet).await
}

async fn account(cfg: &RadiusConfig, packet: &Packet) -> Result<(), BackendError> {
    let reply = exchange(cfg, cfg.accounting_port, cfg.timeout, packet).await?;
    if reply.code != Code::AccountingResponse {
        return Err(protocol(format!("unexpected {:?} in reply to Accounting-Request", reply.code)));
    }
    Ok(())
}

fn accounting_packet(
    cfg: &RadiusConfig,
    status: u32,
    principal: &str,
    device_address: &str,
    session_id: &str,
) -> Result<Packet, BackendError> {
    let identifier = random_identifier().map_err(|e| protocol(format!("{e:#}")))?;
    Ok(Packet::new(Code::AccountingRequest, identifier)
        .with_attribute(Attribute::integer(ACCT_STATUS_TYPE, status))
        .with_attribute(Attribute::text(USER_NAME, principal))
        .with_attribute(Attribute::text(ACCT_SESSION_ID, session_id))
        .with_attribute(Attribute::integer(ACCT_AUTHENTIC, ACCT_AUTHENTIC_RADIUS))
        .with_attribute(Attribute::text(CALLING_STATION_ID, device_address))
        .with_attribute(Attribute::ipv4(NAS_IP_ADDRESS, cfg.nas_ip_address))
        .with_attribute(Attribute::text(NAS_IDENTIFIER, &cfg.nas_identifier)))
}

async fn exchange(cfg: &RadiusConfig, port: u16, limit: Duration, packet: &Packet) -> Result<Packet, BackendError> {
    let secret = cfg.secret.expose_secret().as_bytes();
    let request = packet
        .encode_request(secret)
        .map_err(|e| protocol(format!("{e:#}")))?;
    bounded(limit, async {
        let target = lookup_host((cfg.host.as_str(), port))
            .await
            .map_err(io)?
            .next()
            .ok_or_else(|| {
                io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not resolve", cfg.host),
                ))
            })?;
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(io)?;
        socket.connect(target).await.map_err(io)?;
        socket.send(&request.bytes).await.map_err(io)?;

        let mut buf = vec![0u8; MAX_PACKET_LEN];
        let len = socket.recv(&mut buf).await.map_err(io)?;
        Packet::decode_response(&buf[..len], &request, secret).map_err(|e| protocol(format!("{e:#}")))
    })
    .await
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

fn io(err: std::io::Error) -> BackendError {
    BackendError::from_io(BACKEND, err)
}

fn protocol(message: String) -> BackendError {
    BackendError::Protocol {
        backend: BACKEND,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendSettings;
    use crate::health::HealthState;
    use tokio::task::JoinHandle;
    use warden_radius_proto::attribute::{REPLY_MESSAGE, USER_PASSWORD};
    use warden_radius_proto::crypto::unhide_password;

    const SECRET: &str = "radius-shared";

    fn config(auth_port: u16, accounting_port: u16) -> RadiusConfig {
        let map: BackendSettings = [
            ("serverHost", "127.0.0.1".to_string()),
            ("serverPort", auth_port.to_string()),
            ("accountingPort", accounting_port.to_string()),
            ("sharedSecret", SECRET.to_string()),
            ("timeout", "300".to_string()),
            ("probeTimeout", "300".to_string()),
            ("nasIdentifier", "warden-test".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        RadiusConfig::from_settings(&map).unwrap()
    }

    async fn client_for(auth_port: u16, accounting_port: u16) -> RadiusClient {
        let client = RadiusClient::new();
        client.initialize(config(auth_port, accounting_port)).await;
        client
    }

    /// Answers one datagram with `respond` (None = send raw garbage) and
    /// yields the decoded request.
    async fn fake_server<F>(respond: F) -> (u16, JoinHandle<Packet>)
    where
        F: FnOnce(&Packet) -> Option<Packet> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_LEN];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let request = Packet::decode(&buf[..len]).unwrap();
            let bytes = match respond(&request) {
                Some(reply) => reply
                    .encode_response(&request.authenticator, SECRET.as_bytes())
                    .unwrap(),
                None => vec![0xde, 0xad, 0xbe, 0xef],
            };
            socket.send_to(&bytes, peer).await.unwrap();
            request
        });
        (port, handle)
    }

    /// Bound socket that never answers.
    async fn silent_server() -> (u16, UdpSocket) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (socket.local_addr().unwrap().port(), socket)
    }

    fn attr_text(packet: &Packet, typ: u8) -> Option<String> {
        packet.attribute(typ).and_then(|a| a.as_text().ok())
    }

    fn attr_int(packet: &Packet, typ: u8) -> Option<u32> {
        packet.attribute(typ).and_then(|a| a.as_integer().ok())
    }

    // ==================== Authentication Tests ====================

    #[tokio::test]
    async fn uninitialized_client_fails_without_network() {
        let err = RadiusClient::new().authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::NotInitialized(BackendKind::Radius)));
    }

    #[tokio::test]
    async fn access_accept_accepts() {
        let (port, server) = fake_server(|req| {
            Some(
                Packet::new(Code::AccessAccept, req.identifier)
                    .with_attribute(Attribute::text(REPLY_MESSAGE, "welcome"))
                    .with_attribute(Attribute::text(CLASS, "netops")),
            )
        })
        .await;
        let client = client_for(port, port).await;

        let answer = client.authenticate("alice", "s3cret").await.unwrap();
        assert!(answer.accepted);
        assert_eq!(answer.message.as_deref(), Some("welcome"));
        assert_eq!(answer.attributes, vec![("class".to_string(), "netops".to_string())]);

        let request = server.await.unwrap();
        assert_eq!(request.code, Code::AccessRequest);
        assert_eq!(attr_text(&request, USER_NAME).as_deref(), Some("alice"));
        assert_eq!(attr_text(&request, NAS_IDENTIFIER).as_deref(), Some("warden-test"));
        let hidden = &request.attribute(USER_PASSWORD).unwrap().value;
        let password = unhide_password(hidden, SECRET.as_bytes(), &request.authenticator).unwrap();
        assert_eq!(password, b"s3cret");
    }

    #[tokio::test]
    async fn access_reject_and_challenge_reject() {
        let (port, _server) = fake_server(|req| Some(Packet::new(Code::AccessReject, req.identifier))).await;
        let client = client_for(port, port).await;
        assert!(!client.authenticate("alice", "pw").await.unwrap().accepted);

        let (port, _server) = fake_server(|req| Some(Packet::new(Code::AccessChallenge, req.identifier))).await;
        let client = client_for(port, port).await;
        assert!(!client.authenticate("alice", "pw").await.unwrap().accepted);
    }

    #[tokio::test]
    async fn unreachable_server_fails_within_timeout() {
        let (port, _socket) = silent_server().await;
        let client = client_for(port, port).await;

        let started = std::time::Instant::now();
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout { timeout_ms: 300, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn undecodable_reply_is_a_protocol_error() {
        let (port, _server) = fake_server(|_| None).await;
        let client = client_for(port, port).await;
        let err = client.authenticate("alice", "pw").await.unwrap_err();
        assert!(matches!(err, BackendError::Protocol { .. }));
    }

    // ==================== Accounting Tests ====================

    #[tokio::test]
    async fn accounting_start_and_stop_use_accounting_port() {
        let (acct_port, server) =
            fake_server(|req| Some(Packet::new(Code::AccountingResponse, req.identifier))).await;
        let client = client_for(1, acct_port).await;
        client
            .start_accounting("alice", "10.0.0.9", "sess-1")
            .await
            .unwrap();
        let start = server.await.unwrap();
        assert_eq!(start.code, Code::AccountingRequest);
        assert_eq!(attr_int(&start, ACCT_STATUS_TYPE), Some(ACCT_STATUS_START));
        assert_eq!(attr_text(&start, ACCT_SESSION_ID).as_deref(), Some("sess-1"));
        assert_eq!(attr_text(&start, CALLING_STATION_ID).as_deref(), Some("10.0.0.9"));
        assert!(start.attribute(ACCT_SESSION_TIME).is_none());

        let (acct_port, server) =
            fake_server(|req| Some(Packet::new(Code::AccountingResponse, req.identifier))).await;
        let client = client_for(1, acct_port).await;
        client
            .stop_accounting("alice", "10.0.0.9", "sess-1", 42)
            .await
            .unwrap();
        let stop = server.await.unwrap();
        assert_eq!(attr_int(&stop, ACCT_STATUS_TYPE), Some(ACCT_STATUS_STOP));
        assert_eq!(attr_int(&stop, ACCT_SESSION_TIME), Some(42));
    }

    #[tokio::test]
    async fn accounting_rejects_wrong_reply_code() {
        let (acct_port, _server) = fake_server(|req| Some(Packet::new(Code::AccessAccept, req.identifier))).await;
        let client = client_for(1, acct_port).await;
        assert!(client.start_accounting("alice", "10.0.0.9", "s").await.is_err());
    }

    // ==================== Probe Tests ====================

    #[tokio::test]
    async fn probe_reject_is_online() {
        let (port, server) = fake_server(|req| Some(Packet::new(Code::AccessReject, req.identifier))).await;
        let client = client_for(port, port).await;
        assert_eq!(client.probe().await.status, HealthState::Online);
        assert_eq!(attr_text(&server.await.unwrap(), USER_NAME).as_deref(), Some("probe"));
    }

    #[tokio::test]
    async fn probe_silence_is_offline() {
        let (port, _socket) = silent_server().await;
        let client = client_for(port, port).await;
        assert_eq!(client.probe().await.status, HealthState::Offline);
    }

    #[tokio::test]
    async fn probe_garbage_is_degraded() {
        let (port, _server) = fake_server(|_| None).await;
        let client = client_for(port, port).await;
        assert_eq!(client.probe().await.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn probe_without_config_is_offline() {
        assert_eq!(RadiusClient::new().probe().await.status, HealthState::Offline);
    }
}
