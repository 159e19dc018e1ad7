use crate::CRATE_NAME;
use crate::responder::respond;
use crate::store::ChallengeStore;
use anyhow::Context;
use http::uri::Authority;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const MAX_OPEN_CONNECTIONS: usize = 200;
const CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";
const HEALTH_CHECK_PATH: &str = "/hc";

pub async fn bind(address: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .with_context(|| format!("Binding challenge responder to {address} failed"))
}

/// Serves HTTP-01 proofs from `store` on `listener` until `cancellation_token` fires.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn ChallengeStore>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!("Challenge responder listening on http://{address}");
    }
    // Limit the max number of open connections to avoid an FD-based DoS
    let connection_limiter = Arc::new(Semaphore::new(MAX_OPEN_CONNECTIONS));
    loop {
        let permit = connection_limiter
            .clone()
            .acquire_owned()
            .await
            .context("Connection Limiter failed")?;
        let (client, client_addr) = tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept incoming connection: {e}");
                        continue;
                    }
                }
            }
            () = cancellation_token.cancelled() => {
                info!("Challenge responder shutting down");
                break;
            }
        };
        debug!("Accepted connection from {client_addr}");

        let io = TokioIo::new(client);
        let store = store.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(
                    io,
                    service_fn(|request| async { http_handler(store.as_ref(), request).await }),
                )
                .await
            {
                error!("Error serving connection: {err}");
            }
            // Explicit drop to move the permit to this task
            drop(permit);
        });
    }
    Ok(())
}

async fn http_handler<B>(
    store: &dyn ChallengeStore,
    request: Request<B>,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let path = request.uri().path();
    if path == HEALTH_CHECK_PATH {
        return text_response(StatusCode::OK, "OK");
    }
    let Some(token) = path
        .strip_prefix(CHALLENGE_PATH_PREFIX)
        .filter(|token| !token.is_empty() && !token.contains('/'))
    else {
        return text_response(StatusCode::NOT_FOUND, "Not found");
    };
    if request.method() != Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }
    let host = request_host(&request).unwrap_or_default();
    let response = respond(store, &host, token).await;
    text_response(response.status, response.body)
}

/// Host the request was addressed to, without the port.
fn request_host<B>(request: &Request<B>) -> Option<String> {
    if let Some(host) = request.uri().host() {
        return Some(host.to_string());
    }
    let header = request.headers().get(http::header::HOST)?.to_str().ok()?;
    let authority = header.parse::<Authority>().ok()?;
    Some(authority.host().to_string())
}

fn text_response(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> anyhow::Result<Response<Full<Bytes>>> {
    Ok(Response::builder()
        .status(status)
        .header(http::header::SERVER, CRATE_NAME)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Full::new(body.into()))?)
}
