pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod namespace;
pub mod negotiator;
pub mod parser;
pub mod readiness;
pub mod xml;

pub use config::{NegotiationConfig, ReadinessConfig, Settings};
pub use error::{DiscoveryError, ReadinessError};
pub use model::{LayerCatalog, LayerDescriptor, ServiceEndpoint, ServiceFamily};
pub use negotiator::{Discovery, NegotiatedVersion, VersionNegotiator};
pub use readiness::{LayerReadinessCache, LoadProbe, LoadState, ProbeSample, SessionSnapshot};
