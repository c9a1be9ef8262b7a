//! HTTP forward-proxy listener.
//!
//! Clients send absolute-form requests (`GET http://api.internal/v1/...`).
//! The first handler whose `match` patterns accept the request URL supplies
//! the credentials injected as the `Authorization` header.

use super::{ConnectionHandler, DispatchError, HandlerError, ListenerContext};
use crate::config::{HandlerConfig, HTTP_MAX_REQUEST_BODY};
use crate::proxy::Connection;
use crate::secrets::Variables;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use regex::Regex;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Headers that apply to a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

struct Route {
    handler: HandlerConfig,
    patterns: Vec<Regex>,
}

impl Route {
    fn compile(handler: &HandlerConfig, listener: &str) -> Result<Self, DispatchError> {
        let patterns = handler
            .patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| DispatchError::InvalidHandler {
                    listener: listener.to_string(),
                    handler: handler.name.clone(),
                    message: format!("invalid match pattern '{pattern}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            handler: handler.clone(),
            patterns,
        })
    }

    /// A handler without patterns accepts nothing.
    fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }
}

struct HttpProxy {
    context: ListenerContext,
    routes: Vec<Route>,
    client: reqwest::Client,
}

/// Why a request was not forwarded.
#[derive(Debug)]
enum Rejection {
    Connect,
    NotAbsolute,
    NoRoute(String),
    Body(String),
    Credentials(HandlerError),
    Upstream(reqwest::Error),
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Connect => (
                StatusCode::METHOD_NOT_ALLOWED,
                "CONNECT tunnels cannot carry injected credentials; send plain HTTP requests"
                    .to_string(),
            ),
            Self::NotAbsolute => (
                StatusCode::BAD_REQUEST,
                "requests must use an absolute URI; configure this listener as an HTTP proxy"
                    .to_string(),
            ),
            Self::NoRoute(url) => (
                StatusCode::FORBIDDEN,
                format!("no handler matches {url}"),
            ),
            Self::Body(e) => (StatusCode::PAYLOAD_TOO_LARGE, format!("request body: {e}")),
            Self::Credentials(e) => (
                StatusCode::BAD_GATEWAY,
                format!("unable to obtain credentials: {e}"),
            ),
            Self::Upstream(e) => (StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}")),
        };
        (status, message).into_response()
    }
}

impl HttpProxy {
    async fn forward(&self, request: Request) -> Result<Response, Rejection> {
        if request.method() == Method::CONNECT {
            return Err(Rejection::Connect);
        }
        let uri = request.uri();
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(Rejection::NotAbsolute);
        }
        let url = uri.to_string();

        let route = self
            .routes
            .iter()
            .find(|r| r.matches(&url))
            .ok_or_else(|| Rejection::NoRoute(url.clone()))?;
        let credentials = self
            .context
            .credentials(&route.handler)
            .await
            .map_err(Rejection::Credentials)?;
        let authorization = authorization_header(&credentials).map_err(Rejection::Credentials)?;

        if route.handler.debug {
            debug!(
                "http listener '{}': {} {} via handler '{}' (credentials injected: {})",
                self.context.name(),
                request.method(),
                url,
                route.handler.name,
                authorization.is_some()
            );
        }

        let (parts, body) = request.into_parts();
        let has_body = parts.headers.contains_key(header::CONTENT_LENGTH)
            || parts.headers.contains_key(header::TRANSFER_ENCODING);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::AUTHORIZATION);
        if let Some(value) = authorization {
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut upstream = self.client.request(parts.method, url).headers(headers);
        if has_body {
            let bytes = axum::body::to_bytes(body, HTTP_MAX_REQUEST_BODY)
                .await
                .map_err(|e| Rejection::Body(e.to_string()))?;
            upstream = upstream.body(bytes);
        }
        let upstream = upstream.send().await.map_err(Rejection::Upstream)?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

async fn forward(State(proxy): State<Arc<HttpProxy>>, request: Request) -> Response {
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(rejection) => {
            warn!(
                "http listener '{}': request rejected: {:?}",
                proxy.context.name(),
                rejection
            );
            rejection.into_response()
        }
    }
}

/// The `Authorization` value built from a handler's resolved credentials:
/// `authorization` verbatim, else `token` as a bearer token, else
/// `username`/`password` as basic auth.
pub fn authorization_header(credentials: &Variables) -> Result<Option<HeaderValue>, HandlerError> {
    let value = if let Some(raw) = credentials.optional_str("authorization")? {
        raw.to_string()
    } else if let Some(token) = credentials.optional_str("token")? {
        format!("Bearer {token}")
    } else if let (Some(username), Some(password)) = (
        credentials.optional_str("username")?,
        credentials.optional_str("password")?,
    ) {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    } else {
        return Ok(None);
    };

    let mut header = HeaderValue::from_str(&value)
        .map_err(|e| HandlerError::invalid_credential("authorization", e))?;
    header.set_sensitive(true);
    Ok(Some(header))
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Serves HTTP/1.1 on each accepted connection.
pub struct HttpHandler {
    app: Router,
}

impl HttpHandler {
    pub fn new(context: ListenerContext) -> Result<Self, DispatchError> {
        let routes = context
            .handlers()
            .map(|handler| Route::compile(handler, context.name()))
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| DispatchError::InvalidHandler {
                listener: context.name().to_string(),
                handler: "*".to_string(),
                message: format!("unable to build HTTP client: {e}"),
            })?;

        let proxy = Arc::new(HttpProxy {
            context,
            routes,
            client,
        });
        let app = Router::new()
            .fallback(forward)
            .layer(TraceLayer::new_for_http())
            .with_state(proxy);
        Ok(Self { app })
    }
}

#[async_trait]
impl ConnectionHandler for HttpHandler {
    async fn handle(&self, client: Connection, _peer: &str) -> Result<(), HandlerError> {
        let service = TowerToHyperService::new(self.app.clone());
        http1::Builder::new()
            .serve_connection(TokioIo::new(client), service)
            .await
            .map_err(|e| HandlerError::protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(entries: &[(&str, &str)]) -> Variables {
        Variables::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn authorization_precedence() {
        let header = authorization_header(&vars(&[
            ("authorization", "Custom abc"),
            ("token", "t"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(header, "Custom abc");
        assert!(header.is_sensitive());

        let header = authorization_header(&vars(&[("token", "t0k")])).unwrap().unwrap();
        assert_eq!(header, "Bearer t0k");

        let header = authorization_header(&vars(&[("username", "Aladdin"), ("password", "open sesame")]))
            .unwrap()
            .unwrap();
        assert_eq!(header, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");

        assert!(authorization_header(&vars(&[("username", "only")]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let err = authorization_header(&vars(&[("token", "bad\nvalue")])).unwrap_err();
        assert!(matches!(err, HandlerError::InvalidCredential { .. }));
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic xyz"));
        headers.insert(header::HOST, HeaderValue::from_static("api"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn route_matching() {
        let handler = HandlerConfig {
            name: "api".into(),
            patterns: vec!["^http://api\\.internal/".into()],
            ..Default::default()
        };
        let route = Route::compile(&handler, "http").unwrap();
        assert!(route.matches("http://api.internal/v1/users"));
        assert!(!route.matches("http://other.internal/"));

        let unscoped = Route::compile(&HandlerConfig::default(), "http").unwrap();
        assert!(!unscoped.matches("http://anything/"));

        let bad = HandlerConfig {
            name: "broken".into(),
            patterns: vec!["(".into()],
            ..Default::default()
        };
        assert!(matches!(
            Route::compile(&bad, "http"),
            Err(DispatchError::InvalidHandler { .. })
        ));
    }
}
