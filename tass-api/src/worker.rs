//! Request dispatcher.
//!
//! Every verb call funnels through [`Endpoint::send`]: authenticate if
//! needed, check the tenant, build the URL, split the options, encode the
//! body, send, and wrap the result in a [`ResponseEnvelope`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, Url};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use tass_core::error::{TassError, TassResult};
use tass_core::json::{Map, Value};
use tass_core::validation::raise_for_required_keys;

use crate::download::{safe_file_name, verify_digest, DownloadOptions};
use crate::options::{OptionValue, Params, Payload, RequestOptions};
use crate::pagination::{PageSource, PaginatedResult, PaginationConfig};
use crate::response::ResponseEnvelope;
use crate::session::{header_pair, Session};
use crate::transport::classify_error;
use crate::upload::{FileUpload, FileUploadContext};

/// HTTP verbs the dispatcher sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn method(&self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Patch => Method::PATCH,
            Verb::Delete => Method::DELETE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a `data` payload for `verb`. Tracked objects become a JSON Patch on PATCH.
pub fn encode_payload(verb: Verb, payload: &Payload) -> TassResult<String> {
    match payload {
        Payload::Text(text) => Ok(text.clone()),
        Payload::Tracked(tracked) if verb == Verb::Patch => tracked.as_patch_str(),
        Payload::Tracked(tracked) => tracked.as_json(),
    }
}

/// A resource under the tenant root, e.g. `students`.
#[derive(Debug, Clone)]
pub struct Endpoint {
    session: Arc<Session>,
    endpoint: Option<String>,
}

/// A raw response with what the envelope needs to wrap it.
struct Sent {
    response: Response,
    requested_url: Url,
    safe_statuses: BTreeSet<u16>,
}

impl Endpoint {
    pub fn new(session: Arc<Session>, endpoint: impl Into<String>) -> Self {
        Self {
            session,
            endpoint: Some(endpoint.into()),
        }
    }

    /// The tenant root itself.
    pub fn root(session: Arc<Session>) -> Self {
        Self {
            session,
            endpoint: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn send(&self, verb: Verb, path: &[&str], options: RequestOptions) -> TassResult<Sent> {
        let session = self.session.as_ref();
        session.ensure_authenticated().await?;
        if !session.is_valid_tenant().await {
            error!("company code {} is not in the token's allowed companies", session.config().cmpy_code);
            return Err(TassError::TenantNotAllowed(session.config().cmpy_code.clone()));
        }

        let mut url = session.build_url(self.endpoint(), path)?;
        let (mut transport, domain) = session.build_request_parameters(options);
        session.set_content_type_header(verb, &mut transport);
        let safe_statuses = domain.get_safe_statuses();

        let params = transport.take_params();
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }

        let mut headers: HeaderMap = session.default_headers().await;
        for (name, value) in transport.take_headers() {
            let (name, value) = header_pair(&name, &value)?;
            headers.insert(name, value);
        }

        let mut builder = session
            .transport()
            .request(verb.method(), url.clone())
            .headers(headers);
        let mut upload: Option<FileUploadContext> = None;

        for name in transport.names().into_iter().map(str::to_string).collect::<Vec<_>>() {
            match (name.as_str(), transport.remove(&name)) {
                ("json", Some(OptionValue::Json(value))) => {
                    builder = builder.body(serde_json::to_vec(&value)?);
                }
                ("data", Some(OptionValue::Data(payload))) => {
                    builder = builder.body(encode_payload(verb, &payload)?);
                }
                ("data", Some(OptionValue::Text(text))) => {
                    builder = builder.body(text);
                }
                ("files", Some(OptionValue::Files(files))) => {
                    let mut context = session.prepare_file_upload(&files)?;
                    builder = builder.multipart(context.form()?);
                    upload = Some(context);
                }
                ("timeout", Some(OptionValue::Timeout(timeout))) => {
                    builder = builder.timeout(timeout);
                }
                (name, Some(value)) => {
                    warn!("ignoring unsupported request option '{name}': {value:?}");
                }
                (_, None) => {}
            }
        }

        let request = builder
            .build()
            .map_err(|e| TassError::InvalidRequest(format!("failed to build {verb} {url}: {e}")))?;

        debug!("{verb} {url}");
        let response = session.transport().execute(request).await?;
        debug!("{verb} {url} -> {}", response.status().as_u16());
        drop(upload);

        Ok(Sent {
            response,
            requested_url: url,
            safe_statuses,
        })
    }

    /// Send one request and return the buffered envelope, failing on unsafe statuses.
    pub async fn dispatch(&self, verb: Verb, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        let sent = self.send(verb, path, options).await?;
        let envelope = ResponseEnvelope::read(sent.response, sent.requested_url, sent.safe_statuses).await?;
        envelope.raise_for_status()?;
        Ok(envelope)
    }

    pub async fn get(&self, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        self.dispatch(Verb::Get, path, options).await
    }

    pub async fn post(&self, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        self.dispatch(Verb::Post, path, options).await
    }

    pub async fn put(&self, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        self.dispatch(Verb::Put, path, options).await
    }

    pub async fn patch(&self, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        self.dispatch(Verb::Patch, path, options).await
    }

    pub async fn delete(&self, path: &[&str], options: RequestOptions) -> TassResult<ResponseEnvelope> {
        self.dispatch(Verb::Delete, path, options).await
    }

    /// POST `payload` as JSON after checking it carries every key in `validate_keys`.
    pub async fn create(
        &self,
        path: &[&str],
        payload: &Map,
        validate_keys: Option<&[&str]>,
        options: RequestOptions,
    ) -> TassResult<ResponseEnvelope> {
        if let Some(keys) = validate_keys {
            raise_for_required_keys(payload, keys, None)?;
        }
        self.post(path, options.json(Value::Object(payload.clone()))).await
    }

    /// POST one file as multipart form data.
    pub async fn upload(&self, path: &[&str], file: &FileUpload, options: RequestOptions) -> TassResult<ResponseEnvelope> {
        if options.contains("files") {
            return Err(TassError::InvalidRequest(
                "'files' cannot be combined with an upload".to_string(),
            ));
        }
        info!("uploading {}", file.path().display());
        self.post(path, options.files(file.as_file_map())).await
    }

    /// GET a file and write it under `download.dest`.
    ///
    /// Every status is accepted. When the response carries no file stream the
    /// buffered envelope is returned without a path.
    pub async fn download(
        &self,
        path: &[&str],
        download: DownloadOptions,
        options: RequestOptions,
    ) -> TassResult<(ResponseEnvelope, Option<PathBuf>)> {
        let options = options.safe_statuses(0..=999);
        let Sent {
            mut response,
            requested_url,
            safe_statuses,
        } = self.send(Verb::Get, path, options).await?;
        let envelope = ResponseEnvelope::head(&response, requested_url, safe_statuses);

        if !envelope.has_file_stream() {
            error!(
                "no file stream in response from {} (HTTP {})",
                envelope.url(),
                envelope.status()
            );
            let body = response.bytes().await.map_err(classify_error)?;
            return Ok((envelope.with_body(body), None));
        }

        let file_name = download
            .out_fn
            .clone()
            .or_else(|| envelope.filename())
            .and_then(|name| safe_file_name(&name))
            .ok_or_else(|| TassError::Download(format!("no file name for download from {}", envelope.url())))?;
        let dest = download
            .dest
            .clone()
            .unwrap_or_else(|| self.session.config().attachment_dest.clone());
        tokio::fs::create_dir_all(&dest).await?;
        let out_path = dest.join(file_name);

        let file = tokio::fs::File::create(&out_path).await?;
        let mut writer = BufWriter::with_capacity(download.chunk_size.max(1), file);
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        info!("downloaded {written} bytes to {}", out_path.display());

        if download.validate_checksum {
            match envelope.digest_data() {
                Some(digest) => {
                    verify_digest(&out_path, &digest.algorithm, &digest.hex, download.chunk_size).await?
                }
                None => warn!("no Digest header for {}, checksum not verified", out_path.display()),
            }
        }

        Ok((envelope, Some(out_path)))
    }

    /// A lazy paginated GET. `$top`/`$skip` in the params set the first page.
    pub fn paginate(&self, path: &[&str], mut options: RequestOptions) -> PaginatedResult {
        let base_params = options.take_params();
        let source = EndpointPageSource {
            endpoint: self.clone(),
            path: path.iter().map(|s| s.to_string()).collect(),
            options,
        };
        PaginatedResult::new(Box::new(source), base_params, PaginationConfig::default())
    }
}

/// Fetches pages with GET requests against one endpoint path.
struct EndpointPageSource {
    endpoint: Endpoint,
    path: Vec<String>,
    options: RequestOptions,
}

#[async_trait]
impl PageSource for EndpointPageSource {
    async fn fetch_page(&self, params: Params) -> TassResult<ResponseEnvelope> {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        self.endpoint.get(&path, self.options.clone().params(params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tass_core::patch::TrackedDict;

    #[test]
    fn test_verb_methods() {
        assert_eq!(Verb::Patch.method(), Method::PATCH);
        assert_eq!(Verb::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_encode_payload() {
        let mut content = Map::new();
        content.insert("name".into(), Value::from("Ann"));
        let mut tracked = TrackedDict::new(content);
        tracked.insert("name".into(), Value::from("Bea"));

        let payload = Payload::Tracked(tracked);
        assert_eq!(
            encode_payload(Verb::Patch, &payload).unwrap(),
            r#"[{"op":"test","path":"/name","value":"Ann"},{"op":"replace","path":"/name","value":"Bea"}]"#
        );
        assert_eq!(encode_payload(Verb::Put, &payload).unwrap(), r#"{"name":"Bea"}"#);
        assert_eq!(
            encode_payload(Verb::Patch, &Payload::Text("raw".into())).unwrap(),
            "raw"
        );
    }
}
