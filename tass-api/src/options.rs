//! Per-call request options.
//!
//! Callers pass transport options (query params, headers, body, timeout) and
//! domain options (such as extra safe status codes) through one map. The
//! session splits it by name before a request is built.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use tass_core::constants::odata;
use tass_core::json::Value;
use tass_core::patch::TrackedDict;

/// Option names understood by the transport layer.
pub const TRANSPORT_OPTION_NAMES: &[&str] = &[
    "params",
    "data",
    "headers",
    "cookies",
    "files",
    "auth",
    "timeout",
    "allow_redirects",
    "proxies",
    "hooks",
    "stream",
    "verify",
    "cert",
    "json",
];

/// Domain option holding extra HTTP statuses that do not raise.
pub const SAFE_STATUSES: &str = "safe_statuses";

/// Query parameters, in a stable order.
pub type Params = BTreeMap<String, String>;

/// Extra request headers.
pub type Headers = BTreeMap<String, String>;

/// A raw request body.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Sent verbatim.
    Text(String),
    /// Sent as a JSON Patch on PATCH, as the full JSON object otherwise.
    Tracked(TrackedDict),
}

/// One multipart form field.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text(String),
    File {
        path: PathBuf,
        file_name: String,
        mime_type: String,
    },
}

/// Multipart form fields by name.
pub type FileMap = BTreeMap<String, FormPart>;

/// A single option value.
#[derive(Debug, Clone)]
pub enum OptionValue {
    Params(Params),
    Headers(Headers),
    Json(Value),
    Data(Payload),
    Files(FileMap),
    Timeout(Duration),
    Flag(bool),
    Statuses(BTreeSet<u16>),
    Text(String),
}

/// An option map keyed by option name.
///
/// `params` and `headers` are kept typed so they can be edited in place.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    params: Option<Params>,
    headers: Option<Headers>,
    entries: BTreeMap<String, OptionValue>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set any option by name.
    pub fn set(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: OptionValue) {
        let name = name.into();
        match value {
            OptionValue::Params(params) if name == "params" => self.params = Some(params),
            OptionValue::Headers(headers) if name == "headers" => self.headers = Some(headers),
            value => {
                self.entries.insert(name, value);
            }
        }
    }

    /// Look up an untyped option. `params` and `headers` have their own accessors.
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<OptionValue> {
        match name {
            "params" if self.params.is_some() => self.params.take().map(OptionValue::Params),
            "headers" if self.headers.is_some() => self.headers.take().map(OptionValue::Headers),
            _ => self.entries.remove(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match name {
            "params" if self.params.is_some() => true,
            "headers" if self.headers.is_some() => true,
            _ => self.entries.contains_key(name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_none() && self.headers.is_none() && self.entries.is_empty()
    }

    /// Names of every option set, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        if self.params.is_some() {
            names.push("params");
        }
        if self.headers.is_some() {
            names.push("headers");
        }
        names.sort_unstable();
        names
    }

    /// Replace the query parameters.
    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Add one query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params_mut().insert(key.into(), value.to_string());
        self
    }

    /// Add one request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers_mut().insert(name.into(), value.into());
        self
    }

    /// JSON request body.
    pub fn json(self, value: impl Into<Value>) -> Self {
        self.set("json", OptionValue::Json(value.into()))
    }

    /// Raw or tracked request body.
    pub fn data(self, payload: Payload) -> Self {
        self.set("data", OptionValue::Data(payload))
    }

    /// Multipart form fields.
    pub fn files(self, files: FileMap) -> Self {
        self.set("files", OptionValue::Files(files))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.set("timeout", OptionValue::Timeout(timeout))
    }

    /// Extra statuses treated as OK for this call.
    pub fn safe_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.set(SAFE_STATUSES, OptionValue::Statuses(statuses.into_iter().collect()))
    }

    /// Query parameters, created empty if absent.
    pub fn params_mut(&mut self) -> &mut Params {
        self.params.get_or_insert_with(Params::new)
    }

    /// Request headers, created empty if absent.
    pub fn headers_mut(&mut self) -> &mut Headers {
        self.headers.get_or_insert_with(Headers::new)
    }

    pub fn get_params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    pub fn get_headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    pub fn take_params(&mut self) -> Params {
        self.params.take().unwrap_or_default()
    }

    pub fn take_headers(&mut self) -> Headers {
        self.headers.take().unwrap_or_default()
    }

    /// Extra safe statuses, empty when not set.
    pub fn get_safe_statuses(&self) -> BTreeSet<u16> {
        match self.get(SAFE_STATUSES) {
            Some(OptionValue::Statuses(statuses)) => statuses.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Split into (transport options, everything else).
    pub fn split(self) -> (RequestOptions, RequestOptions) {
        let (transport, domain): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .entries
            .into_iter()
            .partition(|(name, _)| TRANSPORT_OPTION_NAMES.contains(&name.as_str()));
        (
            RequestOptions {
                params: self.params,
                headers: self.headers,
                entries: transport,
            },
            RequestOptions {
                entries: domain,
                ..RequestOptions::default()
            },
        )
    }
}

/// AND an OData `$filter` expression into the query parameters of `options`.
///
/// An existing filter becomes `(existing) and (filter)`.
pub fn merge_filter_param(filter: &str, options: &mut RequestOptions) {
    let params = options.params_mut();
    let merged = match params.get(odata::FILTER).map(|f| f.trim()) {
        Some(existing) if !existing.is_empty() => format!("({existing}) and ({filter})"),
        _ => filter.to_string(),
    };
    params.insert(odata::FILTER.to_string(), merged);
}
