use tracing::{error, info, warn};

use crate::config::NegotiationConfig;
use crate::error::{DiscoveryError, RejectedCandidate, Rejection, TransportError};
use crate::http::{HttpClient, ReqwestClient};
use crate::model::{LayerCatalog, ServiceEndpoint, ServiceFamily};
use crate::parser::{has_layer_elements, parse_capabilities};
use crate::xml::XmlDocument;

/// A version the server accepted, with the document it answered with.
#[derive(Debug, Clone)]
pub struct NegotiatedVersion {
    pub family: ServiceFamily,
    pub version: String,
    pub raw: Vec<u8>,
    pub document: XmlDocument,
}

/// Result of a full discovery: accepted version plus parsed layers.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub family: ServiceFamily,
    pub version: String,
    pub layers: LayerCatalog,
}

enum Attempt {
    Accepted(Vec<u8>, XmlDocument),
    Rejected(Rejection),
    Unreachable(TransportError),
}

/// Finds a protocol version a server actually serves.
///
/// Holds no shared mutable state; one negotiator can serve many endpoints
/// from many threads at once.
pub struct VersionNegotiator<C: HttpClient = ReqwestClient> {
    client: C,
    config: NegotiationConfig,
}

impl VersionNegotiator<ReqwestClient> {
    /// Negotiator backed by a reqwest client built from `config`.
    pub fn from_config(config: NegotiationConfig) -> Result<Self, TransportError> {
        let client = ReqwestClient::new(
            config.attempt_timeout(),
            config.accept_invalid_certs,
            &config.user_agent,
        )?;
        Ok(Self::new(client, config))
    }
}

impl<C: HttpClient> VersionNegotiator<C> {
    pub fn new(client: C, config: NegotiationConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Tries the configured candidates for the endpoint's family in order.
    pub fn negotiate_version(
        &self,
        endpoint: &ServiceEndpoint,
    ) -> Result<NegotiatedVersion, DiscoveryError> {
        let candidates = self.config.candidates(endpoint.family());
        self.negotiate_with(endpoint, candidates)
    }

    /// Tries `candidates` in order and returns the first accepted one.
    ///
    /// Connection failures do not stop the loop. The result is a connection
    /// error only when no candidate got any response; a mix of failures and
    /// rejections is reported as "no compatible version".
    pub fn negotiate_with<S: AsRef<str>>(
        &self,
        endpoint: &ServiceEndpoint,
        candidates: &[S],
    ) -> Result<NegotiatedVersion, DiscoveryError> {
        let family = endpoint.family();
        info!("Negotiating {} version for {}", family, endpoint.base());

        let mut tried = Vec::with_capacity(candidates.len());
        let mut last_transport_error = None;
        let mut any_response = false;

        for candidate in candidates {
            let version = candidate.as_ref();
            match self.attempt(endpoint, version) {
                Attempt::Accepted(raw, document) => {
                    info!("{} version {} accepted by {}", family, version, endpoint.base());
                    return Ok(NegotiatedVersion {
                        family,
                        version: version.to_string(),
                        raw,
                        document,
                    });
                }
                Attempt::Rejected(reason) => {
                    warn!(
                        "{} version {} rejected by {}: {}",
                        family,
                        version,
                        endpoint.base(),
                        reason
                    );
                    any_response = true;
                    tried.push(RejectedCandidate {
                        version: version.to_string(),
                        reason,
                    });
                }
                Attempt::Unreachable(err) => {
                    error!(
                        "Connection error testing {} version {}: {}",
                        family, version, err
                    );
                    tried.push(RejectedCandidate {
                        version: version.to_string(),
                        reason: Rejection::Unreachable(err.to_string()),
                    });
                    last_transport_error = Some(err);
                }
            }
        }

        let url = endpoint.base().to_string();
        match last_transport_error {
            Some(source) if !any_response => Err(DiscoveryError::Connection {
                url,
                family,
                source,
            }),
            _ => {
                error!("No working {} version found for {}", family, url);
                Err(DiscoveryError::NoCompatibleVersion { url, family, tried })
            }
        }
    }

    fn attempt(&self, endpoint: &ServiceEndpoint, version: &str) -> Attempt {
        let url = endpoint.capabilities_url(version);
        let response = match self.client.get(&url) {
            Ok(response) => response,
            Err(err) => return Attempt::Unreachable(err),
        };

        if !response.is_success() {
            return Attempt::Rejected(Rejection::Status(response.status));
        }

        let document = match XmlDocument::parse(&response.body) {
            Ok(document) => document,
            Err(malformed) => return Attempt::Rejected(Rejection::Malformed(malformed.0)),
        };

        if !has_layer_elements(&document, endpoint.family()) {
            return Attempt::Rejected(Rejection::NoLayerElements);
        }

        Attempt::Accepted(response.body, document)
    }

    /// Negotiates a version and parses its layers.
    ///
    /// A negotiated document whose layer elements all lack names is an
    /// [`DiscoveryError::EmptyResult`].
    pub fn negotiate(&self, endpoint: &ServiceEndpoint) -> Result<Discovery, DiscoveryError> {
        let negotiated = self.negotiate_version(endpoint)?;
        let layers = parse_capabilities(&negotiated.document, negotiated.family);

        if layers.is_empty() {
            warn!(
                "{} {} at {} has no named layers",
                negotiated.family,
                negotiated.version,
                endpoint.base()
            );
            return Err(DiscoveryError::EmptyResult {
                url: endpoint.base().to_string(),
                family: negotiated.family,
                version: negotiated.version,
            });
        }

        Ok(Discovery {
            family: negotiated.family,
            version: negotiated.version,
            layers,
        })
    }

    /// Parses `url` for `family` and runs [`negotiate`].
    ///
    /// [`negotiate`]: Self::negotiate
    pub fn negotiate_url(&self, url: &str, family: ServiceFamily) -> Result<Discovery, DiscoveryError> {
        let endpoint = ServiceEndpoint::parse(url, family)?;
        self.negotiate(&endpoint)
    }

    /// Treats `url` as WFS first and falls back to WMS.
    ///
    /// When both fail, a WFS connection error wins (the server is down either
    /// way); otherwise the WMS error is returned.
    pub fn discover(&self, url: &str) -> Result<Discovery, DiscoveryError> {
        let endpoint = ServiceEndpoint::parse(url, ServiceFamily::Wfs)?;

        let wfs_error = match self.negotiate(&endpoint) {
            Ok(discovery) => return Ok(discovery),
            Err(err) => err,
        };
        if wfs_error.is_connection() {
            return Err(wfs_error);
        }
        info!("WFS discovery failed ({}), trying WMS", wfs_error);

        self.negotiate(&endpoint.with_family(ServiceFamily::Wms))
            .map_err(|wms_error| {
                error!(
                    "Service not recognized - WFS: {}, WMS: {}",
                    wfs_error, wms_error
                );
                wms_error
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::namespace::{WFS_2_0, WMS};
    use reqwest::Url;
    use std::collections::HashMap;
    use parking_lot::Mutex;

    /// Answers by the `version` query parameter; records every request.
    struct ScriptedClient {
        by_version: HashMap<String, Result<HttpResponse, String>>,
        requests: Mutex<Vec<Url>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                by_version: HashMap::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, version: &str, status: u16, body: &str) -> Self {
            self.by_version.insert(
                version.to_string(),
                Ok(HttpResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
            );
            self
        }

        fn fail(mut self, version: &str) -> Self {
            self.by_version
                .insert(version.to_string(), Err("connection refused".to_string()));
            self
        }

        fn requested_versions(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .filter_map(|url| {
                    url.query_pairs()
                        .find(|(k, _)| k == "version")
                        .map(|(_, v)| v.into_owned())
                })
                .collect()
        }
    }

    impl HttpClient for ScriptedClient {
        fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(url.clone());
            let version = url
                .query_pairs()
                .find(|(k, _)| k == "version")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            match self.by_version.get(&version) {
                Some(Ok(response)) => Ok(response.clone()),
                Some(Err(reason)) => Err(TransportError::Request {
                    url: url.to_string(),
                    reason: reason.clone(),
                }),
                None => Ok(HttpResponse {
                    status: 400,
                    body: b"<ExceptionReport/>".to_vec(),
                }),
            }
        }
    }

    fn wfs_caps(names: &[&str]) -> String {
        let types: String = names
            .iter()
            .map(|n| format!("<wfs:FeatureType><wfs:Name>{}</wfs:Name></wfs:FeatureType>", n))
            .collect();
        format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}"><wfs:FeatureTypeList>{}</wfs:FeatureTypeList></wfs:WFS_Capabilities>"#,
            WFS_2_0, types
        )
    }

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint::parse("https://geo.example.org/wfs", ServiceFamily::Wfs).unwrap()
    }

    #[test]
    fn test_highest_priority_acceptable_version_wins() {
        let client = ScriptedClient::new()
            .respond("2.0.0", 200, &wfs_caps(&["a:X"]))
            .respond("1.1.0", 200, &wfs_caps(&["a:X"]));
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let negotiated = negotiator.negotiate_version(&endpoint()).unwrap();
        assert_eq!(negotiated.version, "2.0.0");
        assert_eq!(client.requested_versions(), vec!["2.0.0"]);
    }

    #[test]
    fn test_malformed_xml_moves_to_next_candidate() {
        let client = ScriptedClient::new()
            .respond("2.0.0", 200, "<html><body>Oops<br></body></html>")
            .respond("1.1.0", 200, &wfs_caps(&["a:X"]));
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let negotiated = negotiator.negotiate_version(&endpoint()).unwrap();
        assert_eq!(negotiated.version, "1.1.0");
        assert_eq!(client.requested_versions(), vec!["2.0.0", "1.1.0"]);
    }

    #[test]
    fn test_document_without_layers_is_rejected() {
        let caps = format!(r#"<wfs:WFS_Capabilities xmlns:wfs="{}"/>"#, WFS_2_0);
        let client = ScriptedClient::new()
            .respond("2.0.0", 200, &caps)
            .respond("1.1.0", 200, &caps)
            .respond("1.0.0", 200, &caps);
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        match negotiator.negotiate_version(&endpoint()) {
            Err(DiscoveryError::NoCompatibleVersion { tried, .. }) => {
                assert_eq!(tried.len(), 3);
                assert!(tried.iter().all(|t| t.reason == Rejection::NoLayerElements));
            }
            other => panic!("unexpected result: {:?}", other.map(|n| n.version)),
        }
    }

    #[test]
    fn test_all_unreachable_is_connection_error() {
        let client = ScriptedClient::new().fail("2.0.0").fail("1.1.0").fail("1.0.0");
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let err = negotiator.negotiate_version(&endpoint()).unwrap_err();
        assert!(err.is_connection());
        assert_eq!(err.user_message(), "server unreachable");
    }

    #[test]
    fn test_mixed_failures_are_no_compatible_version() {
        let client = ScriptedClient::new()
            .fail("2.0.0")
            .respond("1.1.0", 500, "")
            .fail("1.0.0");
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        match negotiator.negotiate_version(&endpoint()) {
            Err(DiscoveryError::NoCompatibleVersion { tried, .. }) => {
                assert_eq!(tried[1].reason, Rejection::Status(500));
                assert!(matches!(tried[0].reason, Rejection::Unreachable(_)));
            }
            other => panic!("unexpected result: {:?}", other.map(|n| n.version)),
        }
    }

    #[test]
    fn test_version_query_parameter_is_sent() {
        let client = ScriptedClient::new().respond("2.0.0", 200, &wfs_caps(&["a:X"]));
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());
        let endpoint = ServiceEndpoint::parse(
            "https://geo.example.org/wfs?service=WFS&request=GetCapabilities&version=9.9",
            ServiceFamily::Wfs,
        )
        .unwrap();

        negotiator.negotiate_version(&endpoint).unwrap();
        let requests = client.requests.lock();
        let pairs: Vec<(String, String)> = requests[0]
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("service".to_string(), "WFS".to_string()),
                ("request".to_string(), "GetCapabilities".to_string()),
                ("version".to_string(), "2.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_nameless_layers_are_empty_result() {
        let caps = format!(
            r#"<wfs:WFS_Capabilities xmlns:wfs="{}"><wfs:FeatureType><wfs:Title>t</wfs:Title></wfs:FeatureType></wfs:WFS_Capabilities>"#,
            WFS_2_0
        );
        let client = ScriptedClient::new().respond("2.0.0", 200, &caps);
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let err = negotiator.negotiate(&endpoint()).unwrap_err();
        assert!(matches!(err, DiscoveryError::EmptyResult { ref version, .. } if version == "2.0.0"));
        assert_eq!(err.user_message(), "no layers found");
    }

    #[test]
    fn test_discover_falls_back_to_wms() {
        let wms_caps = format!(
            r#"<WMS_Capabilities xmlns="{}"><Capability><Layer><Name>dop</Name></Layer></Capability></WMS_Capabilities>"#,
            WMS
        );
        // Every WFS candidate gets a 400; WMS 1.3.0 answers.
        let client = ScriptedClient::new().respond("1.3.0", 200, &wms_caps);
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let discovery = negotiator.discover("https://geo.example.org/ows").unwrap();
        assert_eq!(discovery.family, ServiceFamily::Wms);
        assert_eq!(discovery.version, "1.3.0");
        assert!(discovery.layers.get("default", "dop").is_some());
    }

    #[test]
    fn test_discover_stops_on_connection_error() {
        let client = ScriptedClient::new().fail("2.0.0").fail("1.1.0").fail("1.0.0");
        let negotiator = VersionNegotiator::new(&client, NegotiationConfig::default());

        let err = negotiator.discover("https://geo.example.org/ows").unwrap_err();
        assert!(err.is_connection());
        assert_eq!(client.requested_versions().len(), 3);
    }
}
