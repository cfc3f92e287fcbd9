use super::SessionError;
use crate::config::{DeviceConfig, Secret};
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use std::fmt;
use std::time::Duration;
use url::Url;

const PLAINTEXT_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plaintext,
    Tls,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Plaintext => write!(f, "mqtt"),
            Scheme::Tls => write!(f, "mqtts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

/// Immutable description of one broker session.
///
/// Built once at boot from the device configuration. The same record drives plaintext and TLS
/// sessions; the scheme decides whether the trust anchor and transport security apply.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    scheme: Scheme,
    host: String,
    port: u16,
    client_id: String,
    trust_anchor: Option<Vec<u8>>,
    credentials: Option<Credentials>,
    keep_alive: Duration,
    capacity: usize,
    max_packet_size: usize,
    control_topic: String,
}

impl SessionConfig {
    /// Resolves the broker section of `config`, loading the trust anchor if one is configured.
    pub fn from_device(config: &DeviceConfig) -> Result<Self, SessionError> {
        let broker = &config.broker;
        let (scheme, host, port) = parse_endpoint(&broker.uri)?;

        let trust_anchor = match (&broker.trust_anchor, scheme) {
            (Some(anchor), Scheme::Tls) => Some(anchor.load()?),
            (Some(_), Scheme::Plaintext) => {
                tracing::warn!("Trust anchor configured for a plaintext broker, ignoring it");
                None
            }
            (None, _) => None,
        };

        let credentials = match (&broker.username, &broker.secret) {
            (Some(username), Some(secret)) => Some(Credentials {
                username: username.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            scheme,
            host,
            port,
            client_id: broker.client_id.clone(),
            trust_anchor,
            credentials,
            keep_alive: Duration::from_secs(broker.keep_alive_secs),
            capacity: broker.capacity,
            max_packet_size: broker.max_packet_size,
            control_topic: config.topics.control.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn control_topic(&self) -> &str {
        &self.control_topic
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn has_trust_anchor(&self) -> bool {
        self.trust_anchor.is_some()
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(self.max_packet_size, self.max_packet_size);

        if let Some(credentials) = &self.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.secret.expose().to_string(),
            );
        }

        if self.scheme == Scheme::Tls {
            let transport = match &self.trust_anchor {
                Some(ca) => Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: ca.clone(),
                    alpn: None,
                    client_auth: None,
                }),
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }

        options
    }
}

/// Splits a broker URI into scheme, host and port.
///
/// `mqtt://` and `tcp://` are plaintext (port 1883 by default), `mqtts://` and `ssl://` use TLS
/// (port 8883 by default).
pub fn parse_endpoint(uri: &str) -> Result<(Scheme, String, u16), SessionError> {
    let invalid = |reason: String| SessionError::InvalidEndpoint {
        uri: uri.to_string(),
        reason,
    };

    let url = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "mqtt" | "tcp" => Scheme::Plaintext,
        "mqtts" | "ssl" => Scheme::Tls,
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?
        .to_string();

    let port = url.port().unwrap_or(match scheme {
        Scheme::Plaintext => PLAINTEXT_PORT,
        Scheme::Tls => TLS_PORT,
    });

    Ok((scheme, host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustAnchor;

    #[test]
    fn endpoint_schemes_and_default_ports() {
        let cases = [
            ("mqtt://broker.hivemq.com", Scheme::Plaintext, 1883),
            ("tcp://10.0.0.2:1884", Scheme::Plaintext, 1884),
            ("mqtts://example.s1.eu.hivemq.cloud", Scheme::Tls, 8883),
            ("ssl://example.s1.eu.hivemq.cloud:443", Scheme::Tls, 443),
        ];
        for (uri, scheme, port) in cases {
            let (parsed_scheme, _, parsed_port) = parse_endpoint(uri).unwrap();
            assert_eq!((parsed_scheme, parsed_port), (scheme, port), "{}", uri);
        }
    }

    #[test]
    fn rejects_foreign_schemes() {
        assert!(matches!(
            parse_endpoint("http://broker.local"),
            Err(SessionError::InvalidEndpoint { .. })
        ));
        assert!(parse_endpoint("broker.local:1883").is_err());
    }

    #[test]
    fn tls_session_carries_anchor_and_credentials() {
        let mut device = DeviceConfig::default();
        device.broker.uri = "mqtts://example.s1.eu.hivemq.cloud".to_string();
        device.broker.username = Some("relay".to_string());
        device.broker.secret = Some(Secret::new("hunter2"));
        device.broker.trust_anchor = Some(TrustAnchor::Inline {
            pem: "-----BEGIN CERTIFICATE-----\n".to_string(),
        });

        let session = SessionConfig::from_device(&device).unwrap();
        assert_eq!(session.endpoint(), "mqtts://example.s1.eu.hivemq.cloud:8883");
        assert!(session.has_trust_anchor());
        assert_eq!(session.credentials().unwrap().username, "relay");
        assert_eq!(session.control_topic(), "esp32/relay/control");

        let options = session.mqtt_options();
        assert_eq!(options.broker_address(), ("example.s1.eu.hivemq.cloud".to_string(), 8883));
        assert_eq!(
            options.credentials(),
            Some(("relay".to_string(), "hunter2".to_string()))
        );
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn plaintext_session_ignores_anchor() {
        let mut device = DeviceConfig::default();
        device.broker.trust_anchor = Some(TrustAnchor::File {
            path: "/definitely/missing/ca.pem".into(),
        });

        let session = SessionConfig::from_device(&device).unwrap();
        assert_eq!(session.endpoint(), "mqtt://broker.hivemq.com:1883");
        assert!(!session.has_trust_anchor());
        assert!(session.credentials().is_none());
        assert!(matches!(session.mqtt_options().transport(), Transport::Tcp));
    }

    #[test]
    fn unreadable_anchor_fails_construction() {
        let mut device = DeviceConfig::default();
        device.broker.uri = "mqtts://broker.local".to_string();
        device.broker.trust_anchor = Some(TrustAnchor::File {
            path: "/definitely/missing/ca.pem".into(),
        });

        assert!(matches!(
            SessionConfig::from_device(&device),
            Err(SessionError::TrustAnchor(_))
        ));
    }
}
