//! Read model published to observers.

use reqwest::header::HeaderMap;

use crate::http::FetchError;

/// Lifecycle of a resource's current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceStatus {
    /// No active request.
    #[default]
    Idle,
    Loading,
    Resolved,
    Errored,
}

/// Everything an observer may render for a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot<T> {
    pub value: Option<T>,
    pub status: ResourceStatus,
    pub is_loading: bool,
    pub error: Option<FetchError>,
    pub status_code: Option<u16>,
    pub headers: HeaderMap,
    /// Circuit breaker is blocking calls for this resource.
    pub disabled: bool,
}

impl<T> Default for ResourceSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: ResourceStatus::Idle,
            is_loading: false,
            error: None,
            status_code: None,
            headers: HeaderMap::new(),
            disabled: false,
        }
    }
}

impl<T> ResourceSnapshot<T> {
    pub fn is_resolved(&self) -> bool {
        self.status == ResourceStatus::Resolved
    }

    pub fn is_errored(&self) -> bool {
        self.status == ResourceStatus::Errored
    }

    pub(crate) fn mark_loading(&mut self, value: Option<T>, keep_previous: bool) {
        self.status = ResourceStatus::Loading;
        self.is_loading = true;
        self.error = None;
        self.disabled = false;
        match value {
            Some(value) => self.value = Some(value),
            None if keep_previous => {}
            None => self.value = None,
        }
    }

    pub(crate) fn mark_resolved(&mut self, value: T, status_code: Option<u16>, headers: HeaderMap) {
        self.value = Some(value);
        self.status = ResourceStatus::Resolved;
        self.is_loading = false;
        self.error = None;
        self.status_code = status_code;
        self.headers = headers;
        self.disabled = false;
    }

    pub(crate) fn mark_errored(&mut self, error: FetchError, disabled: bool) {
        self.value = None;
        self.status = ResourceStatus::Errored;
        self.is_loading = false;
        self.status_code = error.status_code();
        self.error = Some(error);
        self.headers = HeaderMap::new();
        self.disabled = disabled;
    }

    /// Locally written value; response metadata is left as it was.
    pub(crate) fn mark_local(&mut self, value: T) {
        self.value = Some(value);
        self.status = ResourceStatus::Resolved;
        self.is_loading = false;
        self.error = None;
    }

    /// Breaker refused the call: nothing is in flight.
    pub(crate) fn mark_blocked(&mut self) {
        self.disabled = true;
        self.is_loading = false;
        if self.status == ResourceStatus::Loading {
            self.status = ResourceStatus::Idle;
        }
    }

    pub(crate) fn mark_idle(&mut self, disabled: bool) {
        *self = Self {
            disabled,
            ..Self::default()
        };
    }
}
