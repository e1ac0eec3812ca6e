// Client configuration. Built once from the command line and handed to the
// dialer and the response manager.
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::{Result, SIP_SUBPROTOCOL, WsctlError};

pub const DEFAULT_URL: &str = "wss://127.0.0.1:8443";
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1";
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 20000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 10000;

// Connection settings
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub url: Url,
    pub origin: Url,
    pub subprotocol: String,
    // Skip certificate and hostname checks for wss
    pub insecure: bool,
}

// Settings the response manager runs with
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub receive: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    // Challenges are only answered on SIP connections
    pub sip: bool,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        ExchangeSettings {
            receive: true,
            username: None,
            password: None,
            sip: true,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            recv_timeout: Duration::from_millis(DEFAULT_RECV_TIMEOUT_MS),
        }
    }
}

impl ExchangeSettings {
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

// Payload settings
#[derive(Debug, Clone)]
pub struct PayloadConfig {
    pub template: PathBuf,
    pub fields: Option<PathBuf>,
    pub crlf: bool,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect: ConnectConfig,
    pub payload: PayloadConfig,
    pub exchange: ExchangeSettings,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

pub struct ClientConfigBuilder {
    url: String,
    origin: String,
    subprotocol: String,
    insecure: bool,
    template: Option<PathBuf>,
    fields: Option<PathBuf>,
    crlf: bool,
    exchange: ExchangeSettings,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        ClientConfigBuilder {
            url: DEFAULT_URL.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            subprotocol: SIP_SUBPROTOCOL.to_string(),
            insecure: true,
            template: None,
            fields: None,
            crlf: false,
            exchange: ExchangeSettings::default(),
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    pub fn subprotocol(mut self, subprotocol: &str) -> Self {
        self.subprotocol = subprotocol.to_string();
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template = Some(path.into());
        self
    }

    pub fn fields(mut self, path: Option<PathBuf>) -> Self {
        self.fields = path;
        self
    }

    pub fn crlf(mut self, crlf: bool) -> Self {
        self.crlf = crlf;
        self
    }

    pub fn receive(mut self, receive: bool) -> Self {
        self.exchange.receive = receive;
        self
    }

    pub fn credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.exchange.username = username;
        self.exchange.password = password;
        self
    }

    pub fn timeouts(mut self, send_ms: u64, recv_ms: u64) -> Self {
        self.exchange.send_timeout = Duration::from_millis(send_ms);
        self.exchange.recv_timeout = Duration::from_millis(recv_ms);
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let url = Url::parse(&self.url)
            .map_err(|e| WsctlError::Config(format!("invalid url '{}': {}", self.url, e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(WsctlError::Config(format!(
                "unsupported url scheme '{}' (expected ws or wss)",
                url.scheme()
            )));
        }

        let origin = Url::parse(&self.origin)
            .map_err(|e| WsctlError::Config(format!("invalid origin '{}': {}", self.origin, e)))?;

        let template = self.template.ok_or_else(|| {
            WsctlError::Config("missing data template file ('-t' or '--template' parameter must be provided)".to_string())
        })?;

        if self.exchange.send_timeout.is_zero() || self.exchange.recv_timeout.is_zero() {
            return Err(WsctlError::Config("timeouts must be greater than zero".to_string()));
        }

        let mut exchange = self.exchange;
        exchange.sip = self.subprotocol == SIP_SUBPROTOCOL;

        Ok(ClientConfig {
            connect: ConnectConfig {
                url,
                origin,
                subprotocol: self.subprotocol,
                insecure: self.insecure,
            },
            payload: PayloadConfig {
                template,
                fields: self.fields,
                crlf: self.crlf,
            },
            exchange,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = assert_ok!(ClientConfig::builder().template("register.tpl").build());

        assert_eq!(config.connect.url.as_str(), "wss://127.0.0.1:8443/");
        assert_eq!(config.connect.subprotocol, "sip");
        assert!(config.connect.insecure);
        assert!(config.exchange.receive);
        assert!(config.exchange.sip);
        assert_eq!(config.exchange.recv_timeout, Duration::from_millis(20000));
        assert_eq!(config.exchange.send_timeout, Duration::from_millis(10000));
        assert!(!config.payload.crlf);
    }

    #[test]
    fn test_template_is_mandatory() {
        let err = assert_err!(ClientConfig::builder().build());
        assert!(matches!(err, WsctlError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert_err!(ClientConfig::builder().template("t").url("not a url").build());
        assert_err!(ClientConfig::builder().template("t").url("http://127.0.0.1:8080").build());
        assert_err!(ClientConfig::builder().template("t").origin("::").build());
    }

    #[test]
    fn test_non_sip_subprotocol_disables_auth() {
        let config = assert_ok!(ClientConfig::builder().template("t").subprotocol("chat").build());
        assert!(!config.exchange.sip);
    }

    #[test]
    fn test_empty_password_is_unset() {
        let config = assert_ok!(
            ClientConfig::builder()
                .template("t")
                .credentials(Some("alice".to_string()), Some(String::new()))
                .build()
        );
        assert_eq!(config.exchange.password(), None);
    }
}
