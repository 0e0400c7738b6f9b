//! HTTP surface
//!
//! Accepts HTTP/1.1 connections and dispatches each request to the started
//! context with the longest matching context path. Contexts with a resource
//! base serve static files from it. A web application's `WEB-INF` and
//! `META-INF` directories are never served.

use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::server::context::{ContextHandler, ContextHandlerCollection};

/// Accept connections until `shutdown` flips to `true`
pub(crate) async fn serve(
    listener: TcpListener,
    contexts: Option<Arc<ContextHandlerCollection>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("New HTTP connection from {}", addr);
                    let contexts = contexts.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let contexts = contexts.clone();
                            async move {
                                Ok::<_, Infallible>(handle(contexts.as_deref(), req).await)
                            }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("HTTP connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept HTTP connection: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("HTTP listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Answer one request from the mounted contexts
pub async fn handle(
    contexts: Option<&ContextHandlerCollection>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    route(contexts, &method, &path).await
}

pub(crate) async fn route(
    contexts: Option<&ContextHandlerCollection>,
    method: &Method,
    path: &str,
) -> Response<Full<Bytes>> {
    if method != Method::GET && method != Method::HEAD {
        return status(StatusCode::METHOD_NOT_ALLOWED);
    }
    let Some((handler, rest)) = contexts.and_then(|c| c.match_request(path)) else {
        return status(StatusCode::NOT_FOUND);
    };
    let Some(file) = resolve_static(&handler, &rest).await else {
        return status(StatusCode::NOT_FOUND);
    };
    match fs::read(&file).await {
        Ok(body) => {
            let body = if method == Method::HEAD {
                Bytes::new()
            } else {
                Bytes::from(body)
            };
            response(StatusCode::OK, content_type(&file), body)
        }
        Err(e) => {
            debug!("Cannot read {:?}: {}", file, e);
            status(StatusCode::NOT_FOUND)
        }
    }
}

/// Directories of a web application that are never served
const PROTECTED_DIRS: [&str; 2] = ["WEB-INF", "META-INF"];

/// File under the handler's resource base for `rest`, never escaping it
pub(crate) async fn resolve_static(handler: &ContextHandler, rest: &str) -> Option<PathBuf> {
    let base = handler.resource_base()?;
    let relative = Path::new(rest.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if handler.is_webapp() && is_protected(relative) {
        debug!(
            "Refusing protected path {:?} under {}",
            relative,
            handler.context_path()
        );
        return None;
    }
    let target = base.join(relative);
    if is_dir(&target).await {
        for welcome in handler.welcome_files() {
            let candidate = target.join(welcome);
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        return None;
    }
    is_file(&target).await.then_some(target)
}

fn is_protected(relative: &Path) -> bool {
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| {
            PROTECTED_DIRS
                .iter()
                .any(|dir| dir.eq_ignore_ascii_case(first))
        })
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    let reason = code.canonical_reason().unwrap_or("");
    response(code, "text/plain; charset=utf-8", Bytes::from(reason))
}

fn response(code: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = code;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    response
}
