use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Namespace used for layer names without a `prefix:` part.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Query parameters the negotiator sets itself and therefore strips from
/// caller-supplied URLs.
const RESERVED_PARAMS: [&str; 3] = ["service", "request", "version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceFamily {
    Wfs,
    Wms,
}

impl ServiceFamily {
    /// Value of the `service` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceFamily::Wfs => "WFS",
            ServiceFamily::Wms => "WMS",
        }
    }
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wfs" => Ok(ServiceFamily::Wfs),
            "wms" => Ok(ServiceFamily::Wms),
            other => Err(format!("unknown service family: {}", other)),
        }
    }
}

/// A validated service base URL together with the protocol family it is
/// expected to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    base: Url,
    family: ServiceFamily,
}

impl ServiceEndpoint {
    pub fn parse(url: &str, family: ServiceFamily) -> Result<Self, EndpointError> {
        let trimmed = url.trim();
        let mut base = Url::parse(trimmed).map_err(|e| EndpointError::Invalid {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(EndpointError::UnsupportedScheme {
                url: trimmed.to_string(),
                scheme: base.scheme().to_string(),
            });
        }

        // Pasted GetCapabilities URLs already carry service/request/version.
        let kept: Vec<(String, String)> = base
            .query_pairs()
            .filter(|(key, _)| {
                !RESERVED_PARAMS
                    .iter()
                    .any(|reserved| key.eq_ignore_ascii_case(reserved))
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            base.set_query(None);
        } else {
            base.query_pairs_mut().clear().extend_pairs(kept);
        }
        base.set_fragment(None);

        Ok(Self { base, family })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn family(&self) -> ServiceFamily {
        self.family
    }

    /// Same base URL, different family. Used when auto-detection falls back
    /// from WFS to WMS.
    pub fn with_family(&self, family: ServiceFamily) -> Self {
        Self {
            base: self.base.clone(),
            family,
        }
    }

    /// `GetCapabilities` request URL for one candidate version.
    pub fn capabilities_url(&self, version: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("service", self.family.as_str())
            .append_pair("request", "GetCapabilities")
            .append_pair("version", version);
        url
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    /// Local part of the schema type, e.g. `string` for `xsd:string`.
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Qualified name exactly as advertised (`namespace:localName` or bare).
    pub name: String,
    pub namespace: String,
    pub local_name: String,
    pub title: String,
    #[serde(rename = "description")]
    pub abstract_text: String,
    /// Always empty for WMS.
    pub attributes: Vec<AttributeDescriptor>,
}

impl LayerDescriptor {
    /// Builds a descriptor from the advertised name. A missing title falls
    /// back to the local name, the key the layer is listed under.
    pub fn new(name: &str, title: Option<&str>, abstract_text: Option<&str>) -> Self {
        let (namespace, local_name) = split_qualified_name(name);
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            local_name: local_name.to_string(),
            title: title.unwrap_or(local_name).to_string(),
            abstract_text: abstract_text.unwrap_or_default().to_string(),
            attributes: Vec::new(),
        }
    }
}

/// Splits on the first colon. A name without a colon lands in
/// [`DEFAULT_NAMESPACE`].
pub fn split_qualified_name(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((namespace, local)) => (namespace, local),
        None => (DEFAULT_NAMESPACE, name),
    }
}

/// Layers of one namespace in discovery order.
///
/// Re-inserting a local name replaces the descriptor in place, so the
/// position of the first occurrence is kept while the content is last-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceLayers {
    entries: Vec<LayerDescriptor>,
}

impl NamespaceLayers {
    pub fn insert(&mut self, layer: LayerDescriptor) -> Option<LayerDescriptor> {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.local_name == layer.local_name)
        {
            Some(existing) => Some(std::mem::replace(existing, layer)),
            None => {
                self.entries.push(layer);
                None
            }
        }
    }

    pub fn get(&self, local_name: &str) -> Option<&LayerDescriptor> {
        self.entries.iter().find(|l| l.local_name == local_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Namespace -> layers mapping returned by the capability parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerCatalog {
    namespaces: BTreeMap<String, NamespaceLayers>,
}

impl LayerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a layer under its namespace; returns the descriptor it
    /// replaced when the qualified name was already present.
    pub fn insert(&mut self, layer: LayerDescriptor) -> Option<LayerDescriptor> {
        self.namespaces
            .entry(layer.namespace.clone())
            .or_default()
            .insert(layer)
    }

    pub fn get(&self, namespace: &str, local_name: &str) -> Option<&LayerDescriptor> {
        self.namespaces.get(namespace)?.get(local_name)
    }

    /// Looks a layer up by its advertised qualified name.
    pub fn get_qualified(&self, name: &str) -> Option<&LayerDescriptor> {
        let (namespace, local) = split_qualified_name(name);
        self.get(namespace, local)
    }

    pub fn namespace(&self, namespace: &str) -> Option<&NamespaceLayers> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = (&str, &NamespaceLayers)> {
        self.namespaces.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.namespaces.values().flat_map(|ns| ns.iter())
    }

    pub fn len(&self) -> usize {
        self.namespaces.values().map(NamespaceLayers::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
