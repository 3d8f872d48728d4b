//! Typed JSON API endpoints.
//!
//! Handlers are plain functions `Fn(I) -> (O, StatusCode)` (or
//! `Fn() -> (O, StatusCode)`). [`DispatchTable::register`] erases the input
//! and output types behind a uniform boxed future so the router can treat
//! every endpoint the same way.

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use {
    axum::{
        body::Bytes,
        http::{HeaderMap, StatusCode, Uri, header},
        response::{IntoResponse, Response},
    },
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, error},
};

use crate::{content::CACHE_CONTROL_NONE, error::GatewayError};

// ── Types ────────────────────────────────────────────────────────────────────

/// Result of running an endpoint on a request body.
pub type ApiResult = Result<Response, GatewayError>;

pub type ApiFuture = Pin<Box<dyn Future<Output = ApiResult> + Send>>;

/// A boxed endpoint invocation: decode, call, encode.
pub type ApiFn = Box<dyn Fn(Bytes) -> ApiFuture + Send + Sync>;

/// Input of endpoints that take no arguments: only `{}` decodes into it.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoInput {}

/// One registered API path.
pub struct Endpoint {
    path: String,
    input: Option<&'static str>,
    call: ApiFn,
}

impl Endpoint {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Type name of the declared input, `None` for zero-argument handlers.
    pub fn input_type(&self) -> Option<&'static str> {
        self.input
    }

    /// Decode `body`, run the handler and encode its result.
    pub async fn invoke(&self, body: Bytes) -> ApiResult {
        (self.call)(body).await
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

// ── Dispatch table ───────────────────────────────────────────────────────────

/// Path → endpoint map. Built before the server starts, read-only after.
#[derive(Debug, Default)]
pub struct DispatchTable {
    endpoints: BTreeMap<String, Arc<Endpoint>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler taking a JSON object decoded into `I`.
    ///
    /// Requests carrying keys `I` does not declare are refused, whether or
    /// not `I` opts into `#[serde(deny_unknown_fields)]`.
    pub fn register<I, O, F>(
        &mut self,
        path: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, GatewayError>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> (O, StatusCode) + Send + Sync + 'static,
    {
        self.insert(path.into(), Some(std::any::type_name::<I>()), handler)
    }

    /// Register a handler that takes no arguments. The request body must be
    /// `{}`.
    pub fn register_nullary<O, F>(
        &mut self,
        path: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, GatewayError>
    where
        O: Serialize + Send + 'static,
        F: Fn() -> (O, StatusCode) + Send + Sync + 'static,
    {
        self.insert(path.into(), None, move |NoInput {}| handler())
    }

    fn insert<I, O, F>(
        &mut self,
        path: String,
        input: Option<&'static str>,
        handler: F,
    ) -> Result<&mut Self, GatewayError>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> (O, StatusCode) + Send + Sync + 'static,
    {
        if !is_valid_path(&path) {
            return Err(GatewayError::InvalidPath(path));
        }
        if self.endpoints.contains_key(&path) {
            return Err(GatewayError::DuplicatePath(path));
        }
        let handler = Arc::new(handler);
        let call: ApiFn = Box::new(move |body: Bytes| -> ApiFuture {
            Box::pin(call_json(Arc::clone(&handler), body))
        });
        let endpoint = Endpoint {
            path: path.clone(),
            input,
            call,
        };
        debug!(path, input = input.unwrap_or("none"), "registered API endpoint");
        self.endpoints.insert(path, Arc::new(endpoint));
        Ok(self)
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.endpoints.contains_key(path)
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Literal absolute path; no route parameters or wildcards.
fn is_valid_path(path: &str) -> bool {
    path.starts_with('/') && !path.contains(['{', '}', '*', '?', '#'])
}

// ── JSON gateway ─────────────────────────────────────────────────────────────

/// Request-level checks shared by every endpoint, then the endpoint itself.
///
/// Method and token checks happen in middleware before this runs.
pub async fn serve_json(
    endpoint: &Endpoint,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> ApiResult {
    if uri.query().is_some_and(|q| !q.is_empty()) {
        return Err(GatewayError::bad_request("Do not use query argument"));
    }
    // Parameters such as "; charset=utf-8" are ignored.
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_json {
        return Err(GatewayError::bad_request(
            "Content-Type must be application/json",
        ));
    }
    endpoint.invoke(body).await
}

/// Decode `body` into `I`, refusing keys `I` would otherwise skip and any
/// trailing input.
fn decode_strict<I: DeserializeOwned>(body: &[u8]) -> Result<I, GatewayError> {
    let malformed = |e: &dyn std::fmt::Display| {
        GatewayError::bad_request(format!("Malformed user data: {e}"))
    };
    let mut unknown = Vec::new();
    let mut de = serde_json::Deserializer::from_slice(body);
    let input: I = serde_ignored::deserialize(&mut de, |path| unknown.push(path.to_string()))
        .map_err(|e| malformed(&e))?;
    de.end().map_err(|e| malformed(&e))?;
    if let Some(field) = unknown.first() {
        return Err(malformed(&format_args!("unknown field `{field}`")));
    }
    Ok(input)
}

async fn call_json<I, O, F>(handler: Arc<F>, body: Bytes) -> ApiResult
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> (O, StatusCode) + Send + Sync + 'static,
{
    let input: I = decode_strict(&body)?;

    // Handlers are opaque and may block.
    let (output, status) = tokio::task::spawn_blocking(move || handler(input))
        .await
        .map_err(|e| {
            error!(error = %e, "API handler did not complete");
            GatewayError::Handler(e.to_string())
        })?;

    let raw = serde_json::to_vec(&output).map_err(|e| {
        error!(error = %e, "API handler result does not encode");
        GatewayError::Serialization(e.to_string())
    })?;
    Ok((
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, CACHE_CONTROL_NONE),
        ],
        raw,
    )
        .into_response())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {
        serde::ser::Error as _,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct SetPin {
        name: String,
        level: bool,
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to encode"))
        }
    }

    fn json_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, value.parse().unwrap());
        headers
    }

    async fn body_of(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn table() -> DispatchTable {
        let mut t = DispatchTable::new();
        t.register_nullary("/api/v1/ping", || ("pong", StatusCode::OK))
            .unwrap()
            .register("/api/v1/pin/set", |p: SetPin| {
                (format!("{}={}", p.name, p.level), StatusCode::ACCEPTED)
            })
            .unwrap();
        t
    }

    #[test]
    fn registration_metadata() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.paths(), vec!["/api/v1/pin/set", "/api/v1/ping"]);
        assert!(t.get("/api/v1/ping").unwrap().input_type().is_none());
        assert!(
            t.get("/api/v1/pin/set")
                .unwrap()
                .input_type()
                .unwrap()
                .ends_with("SetPin")
        );
    }

    #[test]
    fn rejects_duplicate_and_invalid_paths() {
        let mut t = table();
        assert!(matches!(
            t.register_nullary("/api/v1/ping", || ((), StatusCode::OK)),
            Err(GatewayError::DuplicatePath(_))
        ));
        for bad in ["relative", "/api/{id}", "/api/*rest", "/api?x=1"] {
            assert!(
                matches!(
                    t.register_nullary(bad, || ((), StatusCode::OK)),
                    Err(GatewayError::InvalidPath(_))
                ),
                "{bad}"
            );
        }
        assert_eq!(t.len(), 2);
    }

    #[tokio::test]
    async fn nullary_accepts_only_empty_object() {
        let t = table();
        let ping = t.get("/api/v1/ping").unwrap();

        let resp = ping.invoke(Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], CACHE_CONTROL_NONE);
        assert_eq!(body_of(resp).await, b"\"pong\"");

        let bodies: [&[u8]; 4] = [br#"{"foo":"bar"}"#, b"", b"nope", b"{"];
        for body in bodies {
            let err = ping.invoke(Bytes::copy_from_slice(body)).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
            assert!(err.to_string().starts_with("Malformed user data"));
        }
    }

    #[tokio::test]
    async fn typed_input_and_declared_status() {
        let t = table();
        let set = t.get("/api/v1/pin/set").unwrap();

        let resp = set
            .invoke(Bytes::from_static(br#"{"name":"GPIO4","level":true}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_of(resp).await, b"\"GPIO4=true\"");

        let err = set
            .invoke(Bytes::from_static(br#"{"name":"GPIO4","level":true,"x":1}"#))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let err = set
            .invoke(Bytes::from_static(br#"{"name":"GPIO4"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[derive(Deserialize)]
    struct Lenient {
        name: String,
    }

    #[test]
    fn unknown_fields_refused_without_opt_in() {
        let ok: Lenient = decode_strict(br#"{"name":"GPIO4"}"#).unwrap();
        assert_eq!(ok.name, "GPIO4");

        let err = decode_strict::<Lenient>(br#"{"name":"GPIO4","foo":"bar"}"#)
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("unknown field"), "{err}");
        assert!(err.to_string().contains("foo"), "{err}");

        let err = decode_strict::<Lenient>(br#"{"name":"GPIO4"} {}"#)
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Malformed user data"));
    }

    #[tokio::test]
    async fn encode_failure_and_panic_are_server_errors() {
        let mut t = DispatchTable::new();
        t.register_nullary("/bad", || (Unencodable, StatusCode::OK))
            .unwrap();
        t.register_nullary("/panic", || -> ((), StatusCode) { panic!("handler bug") })
            .unwrap();

        let err = t
            .get("/bad")
            .unwrap()
            .invoke(Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Serialization(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = t
            .get("/panic")
            .unwrap()
            .invoke(Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_checks_run_before_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut t = DispatchTable::new();
        let counter = Arc::clone(&calls);
        t.register_nullary("/count", move || {
            (counter.fetch_add(1, Ordering::SeqCst) + 1, StatusCode::OK)
        })
        .unwrap();
        let ep = t.get("/count").unwrap();
        let body = || Bytes::from_static(b"{}");

        let uri: Uri = "/count?x=1".parse().unwrap();
        let err = serve_json(ep, &uri, &json_headers("application/json"), body())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Do not use query argument");

        let uri: Uri = "/count".parse().unwrap();
        let err = serve_json(ep, &uri, &json_headers("text/plain"), body())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Content-Type must be application/json");

        let err = serve_json(ep, &uri, &HeaderMap::new(), body())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let uri_empty_query: Uri = "/count?".parse().unwrap();
        let resp = serve_json(
            ep,
            &uri_empty_query,
            &json_headers("application/json; charset=utf-8"),
            body(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_of(resp).await, b"1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
