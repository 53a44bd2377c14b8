//! Seam between the cache and whatever is actually loading a layer.

/// Validity of the loaded resource and its data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceHealth {
    Valid,
    InvalidResource,
    ProviderUnavailable,
}

impl ResourceHealth {
    /// Failure text reported to the end user, `None` for [`Valid`].
    ///
    /// [`Valid`]: ResourceHealth::Valid
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            ResourceHealth::Valid => None,
            ResourceHealth::InvalidResource => Some("layer is not valid"),
            ResourceHealth::ProviderUnavailable => Some("data provider is unavailable"),
        }
    }
}

/// One reading of a loading resource's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    pub health: ResourceHealth,
    /// Features materialized so far.
    pub progress: u64,
    /// The loader itself still reports work in flight.
    pub loading: bool,
    /// The resource has a non-null extent.
    pub has_extent: bool,
}

impl ProbeSample {
    pub fn progress(progress: u64) -> Self {
        Self {
            health: ResourceHealth::Valid,
            progress,
            loading: false,
            has_extent: false,
        }
    }

    pub fn with_extent(mut self) -> Self {
        self.has_extent = true;
        self
    }

    pub fn still_loading(mut self) -> Self {
        self.loading = true;
        self
    }

    pub fn unhealthy(health: ResourceHealth) -> Self {
        Self {
            health,
            progress: 0,
            loading: false,
            has_extent: false,
        }
    }
}

/// Observes one loading resource.
///
/// `sample` runs while the cache lock is held, so it must be a cheap local
/// read, never network I/O. `release` frees the underlying resource and runs
/// exactly once, when the session is removed, evicted or the cache is
/// dropped.
pub trait LoadProbe: Send {
    fn sample(&mut self) -> ProbeSample;

    fn release(self: Box<Self>) {}
}

/// Closures are probes without a cleanup hook.
impl<F> LoadProbe for F
where
    F: FnMut() -> ProbeSample + Send,
{
    fn sample(&mut self) -> ProbeSample {
        (*self)()
    }
}
