// SPDX-License-Identifier: AGPL-3.0-only
//! Typed per-backend configuration parsed from flat key/value settings.

use crate::error::ConfigError;
use crate::identity::BackendKind;
use secrecy::SecretString;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Key/value rows stored under one settings category.
pub type BackendSettings = HashMap<String, String>;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_APPLICATION_NAME: &str = "warden";
pub const DEFAULT_PROBE_PRINCIPAL: &str = "probe";
pub const DEFAULT_PROBE_SECRET: &str = "probe123";

struct Reader<'a> {
    backend: BackendKind,
    map: &'a BackendSettings,
}

impl<'a> Reader<'a> {
    fn optional(&self, key: &str) -> Option<&'a str> {
        self.map
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<&'a str, ConfigError> {
        self.optional(key).ok_or(ConfigError::MissingKey {
            backend: self.backend,
            key,
        })
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                backend: self.backend,
                key,
                reason: e.to_string(),
            }),
        }
    }

    fn required_parsed<T>(&self, key: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            backend: self.backend,
            key,
            reason: e.to_string(),
        })
    }

    fn flag(&self, key: &str) -> bool {
        matches!(
            self.optional(key).map(str::to_ascii_lowercase).as_deref(),
            Some("true" | "1" | "yes" | "on")
        )
    }

    fn millis(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let ms: u64 = self.parsed(key, default)?;
        if ms == 0 {
            return Err(ConfigError::InvalidValue {
                backend: self.backend,
                key,
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Duration::from_millis(ms))
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.optional(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryFlavor {
    /// Bind as the service account, look the principal up, rebind as it.
    ActiveDirectory,
    /// Build the principal DN from a pattern and bind directly.
    Generic { user_dn_pattern: String },
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub url: String,
    pub bind_dn: String,
    pub bind_secret: SecretString,
    pub search_base: String,
    pub flavor: DirectoryFlavor,
    pub user_id_attribute: String,
    pub first_name_attribute: String,
    pub last_name_attribute: String,
    pub email_attribute: String,
    pub user_object_class: String,
    pub user_filter: Option<String>,
    pub allowed_groups: Vec<String>,
    pub group_search_base: Option<String>,
    pub group_object_class: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
}

impl DirectoryConfig {
    pub const REQUIRED_KEYS: [&'static str; 4] = ["ldapUrl", "bindDN", "bindCredentials", "searchBase"];

    pub fn from_settings(settings: &BackendSettings) -> Result<DirectoryConfig, ConfigError> {
        let r = Reader {
            backend: BackendKind::Directory,
            map: settings,
        };
        let url = r.required("ldapUrl")?;
        if !(url.starts_with("ldap://") || url.starts_with("ldaps://") || url.starts_with("ldapi://")) {
            return Err(ConfigError::InvalidValue {
                backend: BackendKind::Directory,
                key: "ldapUrl",
                reason: format!("unsupported scheme in '{url}'"),
            });
        }
        let bind_dn = r.required("bindDN")?;
        let bind_secret = r.required("bindCredentials")?;
        let search_base = r.required("searchBase")?;

        let active_directory = r.flag("isActiveDirectory");
        let user_id_attribute = r
            .optional("userIdAttribute")
            .unwrap_or(if active_directory { "sAMAccountName" } else { "uid" })
            .to_string();
        let flavor = if active_directory {
            DirectoryFlavor::ActiveDirectory
        } else {
            let pattern = r
                .optional("userDnPattern")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{user_id_attribute}={{username}},{search_base}"));
            if !pattern.contains("{username}") {
                return Err(ConfigError::InvalidValue {
                    backend: BackendKind::Directory,
                    key: "userDnPattern",
                    reason: "must contain the {username} placeholder".into(),
                });
            }
            DirectoryFlavor::Generic {
                user_dn_pattern: pattern,
            }
        };

        Ok(DirectoryConfig {
            url: url.to_string(),
            bind_dn: bind_dn.to_string(),
            bind_secret: SecretString::new(bind_secret.to_string()),
            search_base: search_base.to_string(),
            flavor,
            user_id_attribute,
            first_name_attribute: r.optional("userFirstNameAttribute").unwrap_or("givenName").to_string(),
            last_name_attribute: r.optional("userLastNameAttribute").unwrap_or("sn").to_string(),
            email_attribute: r.optional("userEmailAttribute").unwrap_or("mail").to_string(),
            user_object_class: r
                .optional("userObjectClass")
                .unwrap_or(if active_directory { "user" } else { "person" })
                .to_string(),
            user_filter: r.optional("userFilter").map(str::to_string),
            allowed_groups: r.list("allowedGroups"),
            group_search_base: r.optional("groupSearchBase").map(str::to_string),
            group_object_class: r
                .optional("groupObjectClass")
                .unwrap_or(if active_directory { "group" } else { "groupOfNames" })
                .to_string(),
            timeout: r.millis("timeout", DEFAULT_TIMEOUT_MS)?,
            connect_timeout: r.millis("connectTimeout", DEFAULT_CONNECT_TIMEOUT_MS)?,
            probe_timeout: r.millis("probeTimeout", DEFAULT_PROBE_TIMEOUT_MS)?,
        })
    }

    pub fn is_active_directory(&self) -> bool {
        self.flavor == DirectoryFlavor::ActiveDirectory
    }

    pub fn group_base(&self) -> &str {
        self.group_search_base.as_deref().unwrap_or(&self.search_base)
    }
}

#[derive(Debug, Clone)]
pub struct TacacsConfig {
    pub host: String,
    pub port: u16,
    pub secret: SecretString,
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub application_name: String,
    pub probe_principal: String,
    pub probe_secret: SecretString,
}

impl TacacsConfig {
    pub const REQUIRED_KEYS: [&'static str; 3] = ["serverHost", "serverPort", "sharedSecret"];

    pub fn from_settings(settings: &BackendSettings) -> Result<TacacsConfig, ConfigError> {
        let r = Reader {
            backend: BackendKind::Tacacs,
            map: settings,
        };
        let host = r.required("serverHost")?;
        let port: u16 = r.required_parsed("serverPort")?;
        let secret = r.required("sharedSecret")?;
        if secret.len() < warden_tacacs_proto::MIN_SECRET_LEN {
            return Err(ConfigError::InvalidValue {
                backend: BackendKind::Tacacs,
                key: "sharedSecret",
                reason: format!(
                    "must be at least {} bytes",
                    warden_tacacs_proto::MIN_SECRET_LEN
                ),
            });
        }
        Ok(TacacsConfig {
            host: host.to_string(),
            port,
            secret: SecretString::new(secret.to_string()),
            timeout: r.millis("timeout", DEFAULT_TIMEOUT_MS)?,
            probe_timeout: r.millis("probeTimeout", DEFAULT_PROBE_TIMEOUT_MS)?,
            application_name: r
                .optional("applicationName")
                .unwrap_or(DEFAULT_APPLICATION_NAME)
                .to_string(),
            probe_principal: r.optional("testUsername").unwrap_or(DEFAULT_PROBE_PRINCIPAL).to_string(),
            probe_secret: SecretString::new(r.optional("testPassword").unwrap_or(DEFAULT_PROBE_SECRET).to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RadiusConfig {
    pub host: String,
    pub port: u16,
    pub accounting_port: u16,
    pub secret: SecretString,
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub nas_ip_address: Ipv4Addr,
    pub nas_identifier: String,
    pub probe_principal: String,
    pub probe_secret: SecretString,
}

impl RadiusConfig {
    pub const REQUIRED_KEYS: [&'static str; 3] = ["serverHost", "serverPort", "sharedSecret"];

    pub fn from_settings(settings: &BackendSettings) -> Result<RadiusConfig, ConfigError> {
        let r = Reader {
            backend: BackendKind::Radius,
            map: settings,
        };
        let host = r.required("serverHost")?;
        let port: u16 = r.required_parsed("serverPort")?;
        let secret = r.required("sharedSecret")?;
        let accounting_port = match r.optional("accountingPort") {
            Some(_) => r.required_parsed("accountingPort")?,
            None => port.checked_add(1).ok_or_else(|| ConfigError::InvalidValue {
                backend: BackendKind::Radius,
                key: "accountingPort",
                reason: format!("required when serverPort is {port}"),
            })?,
        };
        Ok(RadiusConfig {
            host: host.to_string(),
            port,
            accounting_port,
            secret: SecretString::new(secret.to_string()),
            timeout: r.millis("timeout", DEFAULT_TIMEOUT_MS)?,
            probe_timeout: r.millis("probeTimeout", DEFAULT_PROBE_TIMEOUT_MS)?,
            nas_ip_address: r.parsed("nasIpAddress", Ipv4Addr::LOCALHOST)?,
            nas_identifier: r
                .optional("nasIdentifier")
                .unwrap_or(DEFAULT_APPLICATION_NAME)
                .to_string(),
            probe_principal: r.optional("testUsername").unwrap_or(DEFAULT_PROBE_PRINCIPAL).to_string(),
            probe_secret: SecretString::new(r.optional("testPassword").unwrap_or(DEFAULT_PROBE_SECRET).to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn settings(pairs: &[(&str, &str)]) -> BackendSettings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn directory_base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ldapUrl", "ldap://dc1.example.com"),
            ("bindDN", "cn=svc,dc=example,dc=com"),
            ("bindCredentials", "hunter22"),
            ("searchBase", "dc=example,dc=com"),
        ]
    }

    // ==================== Directory Tests ====================

    #[test]
    fn each_required_directory_key_is_enforced() {
        for missing in DirectoryConfig::REQUIRED_KEYS {
            let pairs: Vec<_> = directory_base()
                .into_iter()
                .filter(|(k, _)| *k != missing)
                .collect();
            let err = DirectoryConfig::from_settings(&settings(&pairs)).unwrap_err();
            assert_eq!(
                err,
                ConfigError::MissingKey {
                    backend: BackendKind::Directory,
                    key: missing
                }
            );
        }
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut pairs = directory_base();
        pairs[2] = ("bindCredentials", "   ");
        assert!(DirectoryConfig::from_settings(&settings(&pairs)).is_err());
    }

    #[test]
    fn generic_directory_defaults() {
        let cfg = DirectoryConfig::from_settings(&settings(&directory_base())).unwrap();
        assert_eq!(
            cfg.flavor,
            DirectoryFlavor::Generic {
                user_dn_pattern: "uid={username},dc=example,dc=com".into()
            }
        );
        assert_eq!(cfg.timeout, Duration::from_millis(5000));
        assert_eq!(cfg.connect_timeout, Duration::from_millis(10000));
        assert_eq!(cfg.user_object_class, "person");
        assert_eq!(cfg.group_base(), "dc=example,dc=com");
    }

    #[test]
    fn active_directory_defaults() {
        let mut pairs = directory_base();
        pairs.push(("isActiveDirectory", "true"));
        pairs.push(("allowedGroups", "NetOps, Admins ,"));
        let cfg = DirectoryConfig::from_settings(&settings(&pairs)).unwrap();
        assert!(cfg.is_active_directory());
        assert_eq!(cfg.user_id_attribute, "sAMAccountName");
        assert_eq!(cfg.allowed_groups, vec!["NetOps", "Admins"]);
    }

    #[test]
    fn dn_pattern_requires_placeholder() {
        let mut pairs = directory_base();
        pairs.push(("userDnPattern", "cn=static,dc=example"));
        assert!(DirectoryConfig::from_settings(&settings(&pairs)).is_err());
    }

    #[test]
    fn directory_url_scheme_checked() {
        let mut pairs = directory_base();
        pairs[0] = ("ldapUrl", "http://dc1");
        assert!(DirectoryConfig::from_settings(&settings(&pairs)).is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let cfg = DirectoryConfig::from_settings(&settings(&directory_base())).unwrap();
        assert!(!format!("{cfg:?}").contains("hunter22"));
    }

    // ==================== TACACS+ Tests ====================

    #[test]
    fn tacacs_requires_port_number() {
        let err = TacacsConfig::from_settings(&settings(&[
            ("serverHost", "tac.example.com"),
            ("serverPort", "forty-nine"),
            ("sharedSecret", "longenough"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "serverPort", .. }));
    }

    #[test]
    fn tacacs_short_secret_rejected() {
        let err = TacacsConfig::from_settings(&settings(&[
            ("serverHost", "tac.example.com"),
            ("serverPort", "49"),
            ("sharedSecret", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "sharedSecret", .. }));
    }

    #[test]
    fn tacacs_defaults() {
        let cfg = TacacsConfig::from_settings(&settings(&[
            ("serverHost", "tac.example.com"),
            ("serverPort", "49"),
            ("sharedSecret", "longenough"),
        ]))
        .unwrap();
        assert_eq!(cfg.timeout, Duration::from_millis(5000));
        assert_eq!(cfg.probe_timeout, Duration::from_millis(3000));
        assert_eq!(cfg.probe_principal, "probe");
        assert_eq!(cfg.probe_secret.expose_secret(), "probe123");
    }

    // ==================== RADIUS Tests ====================

    #[test]
    fn radius_accounting_port_defaults_to_auth_plus_one() {
        let cfg = RadiusConfig::from_settings(&settings(&[
            ("serverHost", "radius.example.com"),
            ("serverPort", "1812"),
            ("sharedSecret", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(cfg.accounting_port, 1813);
        assert_eq!(cfg.nas_ip_address, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn radius_top_port_needs_explicit_accounting_port() {
        let mut pairs = vec![
            ("serverHost", "radius.example.com"),
            ("serverPort", "65535"),
            ("sharedSecret", "s3cret"),
        ];
        let err = RadiusConfig::from_settings(&settings(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "accountingPort", .. }));

        pairs.push(("accountingPort", "1813"));
        let cfg = RadiusConfig::from_settings(&settings(&pairs)).unwrap();
        assert_eq!((cfg.port, cfg.accounting_port), (65535, 1813));
    }

    #[test]
    fn radius_zero_timeout_rejected() {
        let err = RadiusConfig::from_settings(&settings(&[
            ("serverHost", "radius.example.com"),
            ("serverPort", "1812"),
            ("sharedSecret", "s3cret"),
            ("timeout", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "timeout", .. }));
    }

    #[test]
    fn radius_missing_secret_reported() {
        let err = RadiusConfig::from_settings(&settings(&[
            ("serverHost", "radius.example.com"),
            ("serverPort", "1812"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingKey {
                backend: BackendKind::Radius,
                key: "sharedSecret"
            }
        );
    }
}
