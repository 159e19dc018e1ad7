//! An in-process ACME CA speaking just enough RFC 8555 for `instant-acme`.
//!
//! Request signatures are not verified. Challenges marked ready are validated lazily, on the
//! next poll of the order, like a real CA that validates asynchronously.

use crate::common::{fetch_proof, issue_certificate};
use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use edgecert::cert::load_certificates_from_memory;
use edgecert::crypto::sha256;
use edgecert::trust_store::MemoryTrustStore;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use instant_acme::{BodyWrapper, BytesResponse, HttpClient};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;
use x509_parser::pem::parse_x509_pem;

const BASE_URL: &str = "https://acme.test";
pub const DIRECTORY_URL: &str = "https://acme.test/directory";
const ACME_IDENTIFIER_OID: &str = "1.3.6.1.5.5.7.1.31";

/// How the CA checks the proof for one identifier.
#[async_trait]
pub trait ProofCheck: Send + Sync {
    async fn check(&self, domain: &str, token: &str, key_auth: &str) -> bool;
}

/// HTTP-01 validation against a local responder.
pub struct HttpProof(pub SocketAddr);

#[async_trait]
impl ProofCheck for HttpProof {
    async fn check(&self, domain: &str, token: &str, key_auth: &str) -> bool {
        match fetch_proof(self.0, domain, token).await {
            Ok((status, body)) => status == reqwest::StatusCode::OK && body == key_auth,
            Err(_) => false,
        }
    }
}

/// TLS-ALPN-01 validation of whatever certificate the trust store holds under `placeholder`.
pub struct TlsAlpnProof {
    pub trust_store: Arc<MemoryTrustStore>,
    pub placeholder: String,
}

#[async_trait]
impl ProofCheck for TlsAlpnProof {
    async fn check(&self, domain: &str, _token: &str, key_auth: &str) -> bool {
        let Some(stored) = self.trust_store.get(&self.placeholder) else {
            return false;
        };
        let Ok(parsed) = load_certificates_from_memory(&stored.certificate, Some(1)) else {
            return false;
        };
        if !matches!(parsed.first(), Some(cert) if cert.dns_names == [domain]) {
            return false;
        }
        let Ok((_, pem)) = parse_x509_pem(stored.certificate.as_bytes()) else {
            return false;
        };
        let Ok(certificate) = pem.parse_x509() else {
            return false;
        };
        let mut expected = vec![0x04, 0x20];
        expected.extend_from_slice(&sha256(key_auth.as_bytes()));
        certificate.extensions().iter().any(|extension| {
            extension.oid.to_id_string() == ACME_IDENTIFIER_OID
                && extension.critical
                && extension.value == expected.as_slice()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthorizationStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

struct AuthorizationRecord {
    domain: String,
    token: String,
    status: AuthorizationStatus,
}

struct OrderRecord {
    authorizations: Vec<usize>,
    domains: Vec<String>,
    finalized: bool,
}

#[derive(Default)]
struct State {
    nonce: u64,
    thumbprint: String,
    orders: Vec<OrderRecord>,
    authorizations: Vec<AuthorizationRecord>,
    validations: Vec<(String, bool)>,
}

struct Inner {
    proof: Box<dyn ProofCheck>,
    not_after: OffsetDateTime,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct FakeAcme {
    inner: Arc<Inner>,
}

impl FakeAcme {
    pub fn new(proof: impl ProofCheck + 'static, not_after: OffsetDateTime) -> Self {
        Self {
            inner: Arc::new(Inner {
                proof: Box::new(proof),
                not_after,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Every validation performed so far, in order, with its outcome.
    pub fn validations(&self) -> Vec<(String, bool)> {
        self.inner.state.lock().validations.clone()
    }

    async fn handle(&self, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
        let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
        match (method, segments.as_slice()) {
            (&Method::GET, ["directory"]) => json_response(
                StatusCode::OK,
                json!({
                    "newNonce": format!("{BASE_URL}/nonce"),
                    "newAccount": format!("{BASE_URL}/account"),
                    "newOrder": format!("{BASE_URL}/order"),
                }),
            ),
            (&Method::HEAD, ["nonce"]) => empty_response(StatusCode::OK),
            (&Method::POST, ["account"]) => self.new_account(body),
            (&Method::POST, ["order"]) => self.new_order(body),
            (&Method::POST, ["order", id]) => {
                self.validate_processing().await;
                self.order_response(id, StatusCode::OK)
            }
            (&Method::POST, ["order", id, "finalize"]) => self.finalize(id),
            (&Method::POST, ["authz", id]) => self.authorization_response(id),
            (&Method::POST, ["chall", id, kind]) => self.ready(id, kind),
            (&Method::POST, ["cert", id]) => self.certificate(id),
            _ => problem(StatusCode::NOT_FOUND, "malformed", &format!("No route for {path}")),
        }
    }

    fn new_account(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Some(jwk) = protected_header(body).map(|header| header["jwk"].clone()) else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "Missing JWK");
        };
        let field = |name: &str| jwk[name].as_str().unwrap_or_default().to_string();
        let canonical = format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            field("crv"),
            field("kty"),
            field("x"),
            field("y")
        );
        self.inner.state.lock().thumbprint = BASE64_URL_SAFE_NO_PAD.encode(sha256(canonical.as_bytes()));
        let mut response = json_response(StatusCode::CREATED, json!({"status": "valid"}));
        response.headers_mut().insert(
            http::header::LOCATION,
            http::HeaderValue::from_static("https://acme.test/account/0"),
        );
        response
    }

    fn new_order(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let Some(payload) = payload(body) else {
            return problem(StatusCode::BAD_REQUEST, "malformed", "Missing order payload");
        };
        let domains = payload["identifiers"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|identifier| identifier["value"].as_str())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let id = {
            let mut state = self.inner.state.lock();
            let mut authorizations = Vec::new();
            for domain in &domains {
                let authorization = state.authorizations.len();
                state.authorizations.push(AuthorizationRecord {
                    domain: domain.clone(),
                    token: format!("token-{authorization}"),
                    status: AuthorizationStatus::Pending,
                });
                authorizations.push(authorization);
            }
            state.orders.push(OrderRecord {
                authorizations,
                domains,
                finalized: false,
            });
            state.orders.len() - 1
        };
        let mut response = self.order_response(&id.to_string(), StatusCode::CREATED);
        if let Ok(location) = http::HeaderValue::from_str(&format!("{BASE_URL}/order/{id}")) {
            response.headers_mut().insert(http::header::LOCATION, location);
        }
        response
    }

    fn order_status(state: &State, order: &OrderRecord) -> &'static str {
        let statuses = order
            .authorizations
            .iter()
            .map(|&id| state.authorizations[id].status)
            .collect::<Vec<_>>();
        if statuses.contains(&AuthorizationStatus::Invalid) {
            "invalid"
        } else if statuses.iter().all(|status| *status == AuthorizationStatus::Valid) {
            if order.finalized { "valid" } else { "ready" }
        } else {
            "pending"
        }
    }

    fn order_response(&self, id: &str, status: StatusCode) -> Response<Full<Bytes>> {
        let state = self.inner.state.lock();
        let Some(order) = id.parse::<usize>().ok().and_then(|id| state.orders.get(id)) else {
            return problem(StatusCode::NOT_FOUND, "malformed", "No such order");
        };
        let order_status = Self::order_status(&state, order);
        let mut body = json!({
            "status": order_status,
            "authorizations": order
                .authorizations
                .iter()
                .map(|authorization| format!("{BASE_URL}/authz/{authorization}"))
                .collect::<Vec<_>>(),
            "finalize": format!("{BASE_URL}/order/{id}/finalize"),
        });
        if order_status == "valid" {
            body["certificate"] = json!(format!("{BASE_URL}/cert/{id}"));
        }
        json_response(status, body)
    }

    fn finalize(&self, id: &str) -> Response<Full<Bytes>> {
        {
            let mut state = self.inner.state.lock();
            let Some(index) = id.parse::<usize>().ok().filter(|&id| id < state.orders.len()) else {
                return problem(StatusCode::NOT_FOUND, "malformed", "No such order");
            };
            if Self::order_status(&state, &state.orders[index]) != "ready" {
                return problem(StatusCode::FORBIDDEN, "orderNotReady", "Order is not ready");
            }
            state.orders[index].finalized = true;
        }
        self.order_response(id, StatusCode::OK)
    }

    fn authorization_response(&self, id: &str) -> Response<Full<Bytes>> {
        let state = self.inner.state.lock();
        let Some(authorization) = id.parse::<usize>().ok().and_then(|id| state.authorizations.get(id)) else {
            return problem(StatusCode::NOT_FOUND, "malformed", "No such authorization");
        };
        let (status, challenge_status) = match authorization.status {
            AuthorizationStatus::Pending => ("pending", "pending"),
            AuthorizationStatus::Processing => ("pending", "processing"),
            AuthorizationStatus::Valid => ("valid", "valid"),
            AuthorizationStatus::Invalid => ("invalid", "invalid"),
        };
        let challenges = ["http-01", "tls-alpn-01"]
            .iter()
            .map(|kind| {
                json!({
                    "type": kind,
                    "url": format!("{BASE_URL}/chall/{id}/{kind}"),
                    "token": authorization.token,
                    "status": challenge_status,
                })
            })
            .collect::<Vec<_>>();
        json_response(
            StatusCode::OK,
            json!({
                "identifier": {"type": "dns", "value": authorization.domain},
                "status": status,
                "challenges": challenges,
            }),
        )
    }

    fn ready(&self, id: &str, kind: &str) -> Response<Full<Bytes>> {
        let mut state = self.inner.state.lock();
        let Some(authorization) = id
            .parse::<usize>()
            .ok()
            .and_then(|id| state.authorizations.get_mut(id))
        else {
            return problem(StatusCode::NOT_FOUND, "malformed", "No such challenge");
        };
        if authorization.status == AuthorizationStatus::Pending {
            authorization.status = AuthorizationStatus::Processing;
        }
        json_response(
            StatusCode::OK,
            json!({
                "type": kind,
                "url": format!("{BASE_URL}/chall/{id}/{kind}"),
                "token": authorization.token,
                "status": "processing",
            }),
        )
    }

    fn certificate(&self, id: &str) -> Response<Full<Bytes>> {
        let domains = {
            let state = self.inner.state.lock();
            match id.parse::<usize>().ok().and_then(|id| state.orders.get(id)) {
                Some(order) if order.finalized => order.domains.clone(),
                _ => return problem(StatusCode::NOT_FOUND, "malformed", "No certificate"),
            }
        };
        match issue_certificate(&domains, self.inner.not_after) {
            Ok(issued) => Response::new(Full::new(Bytes::from(issued.certificate))),
            Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, "serverInternal", &e.to_string()),
        }
    }

    /// Validates every challenge the client marked ready since the last poll.
    async fn validate_processing(&self) {
        let pending = {
            let state = self.inner.state.lock();
            state
                .authorizations
                .iter()
                .enumerate()
                .filter(|(_, authorization)| authorization.status == AuthorizationStatus::Processing)
                .map(|(id, authorization)| {
                    (
                        id,
                        authorization.domain.clone(),
                        authorization.token.clone(),
                        format!("{}.{}", authorization.token, state.thumbprint),
                    )
                })
                .collect::<Vec<_>>()
        };
        for (id, domain, token, key_auth) in pending {
            let valid = self.inner.proof.check(&domain, &token, &key_auth).await;
            let mut state = self.inner.state.lock();
            state.authorizations[id].status = if valid {
                AuthorizationStatus::Valid
            } else {
                AuthorizationStatus::Invalid
            };
            state.validations.push((domain, valid));
        }
    }

    fn next_nonce(&self) -> String {
        let mut state = self.inner.state.lock();
        state.nonce += 1;
        format!("nonce-{}", state.nonce)
    }
}

impl HttpClient for FakeAcme {
    fn request(
        &self,
        req: Request<BodyWrapper<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<BytesResponse, instant_acme::Error>> + Send>> {
        let acme = self.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| instant_acme::Error::Other(e.into()))?
                .to_bytes();
            let mut response = acme.handle(&parts.method, parts.uri.path(), &body).await;
            if let Ok(nonce) = http::HeaderValue::from_str(&acme.next_nonce()) {
                response.headers_mut().insert("Replay-Nonce", nonce);
            }
            Ok(BytesResponse::from(response))
        })
    }
}

fn decode_segment(segment: &Value) -> Option<Value> {
    let decoded = BASE64_URL_SAFE_NO_PAD.decode(segment.as_str()?).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn protected_header(body: &[u8]) -> Option<Value> {
    let jws: Value = serde_json::from_slice(body).ok()?;
    decode_segment(&jws["protected"])
}

fn payload(body: &[u8]) -> Option<Value> {
    let jws: Value = serde_json::from_slice(body).ok()?;
    decode_segment(&jws["payload"])
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn problem(status: StatusCode, kind: &str, detail: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        json!({
            "type": format!("urn:ietf:params:acme:error:{kind}"),
            "detail": detail,
            "status": status.as_u16(),
        }),
    )
}
