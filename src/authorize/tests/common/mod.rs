//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sentinel_authorize::check::{
    make_context_extensions, AttributeContext, HeaderValue, HttpRequest, RequestAttributes,
};
use sentinel_authorize::databroker::RecordKey;
use sentinel_authorize::session::{SessionStoreError, TokenExchangeError};
use sentinel_authorize::{
    Authorize, AuthorizeState, CacheConfig, CachingQuerier, CheckRequest, Config, DataBrokerClient,
    DataBrokerError, EvaluateError, EvaluationRequest, EvaluationResult, Evaluator, IncomingRequest,
    IncomingTokenSessionCreator, InMemoryDataBroker, Options, Policy, Record, Session, SessionState,
    SessionStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Record store that counts remote reads
#[derive(Default)]
pub struct CountingDataBroker {
    pub inner: InMemoryDataBroker,
    gets: AtomicUsize,
    reads: Mutex<Vec<RecordKey>>,
}

impl CountingDataBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn gets_for(&self, record_type: &str, id: &str) -> usize {
        let key = RecordKey::new(record_type, id);
        self.reads.lock().iter().filter(|k| **k == key).count()
    }

    pub async fn seed(&self, records: Vec<Record>) -> Vec<Record> {
        self.inner.put(records).await.unwrap()
    }
}

#[async_trait]
impl DataBrokerClient for CountingDataBroker {
    async fn get(&self, record_type: &str, id: &str, min_version: u64) -> Result<Record, DataBrokerError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().push(RecordKey::new(record_type, id));
        self.inner.get(record_type, id, min_version).await
    }

    async fn put(&self, records: Vec<Record>) -> Result<Vec<Record>, DataBrokerError> {
        self.inner.put(records).await
    }
}

/// Evaluator returning a fixed result and remembering what it was asked
pub struct RecordingEvaluator {
    result: Mutex<Result<EvaluationResult, EvaluateError>>,
    requests: Mutex<Vec<EvaluationRequest>>,
}

impl RecordingEvaluator {
    pub fn new(result: Result<EvaluationResult, EvaluateError>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn allowing() -> Arc<Self> {
        Self::new(Ok(EvaluationResult::allow()))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<EvaluationRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Evaluator for RecordingEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EvaluateError> {
        self.requests.lock().push(request.clone());
        self.result.lock().clone()
    }
}

/// Session store reading `Authorization: Bearer <id>:<version>`
pub struct BearerSessionStore;

impl SessionStore for BearerSessionStore {
    fn load_session_state_and_check_idp(
        &self,
        request: &IncomingRequest,
    ) -> Result<Option<SessionState>, SessionStoreError> {
        let Some(header) = request.header("Authorization") else {
            return Ok(None);
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Ok(None);
        };
        if token == "revoked" {
            return Err(SessionStoreError::InvalidSession("token revoked".into()));
        }

        let (id, version) = token
            .split_once(':')
            .ok_or_else(|| SessionStoreError::Malformed(token.to_string()))?;
        let version = version
            .parse()
            .map_err(|_| SessionStoreError::Malformed(token.to_string()))?;

        Ok(Some(SessionState::new(id, version)))
    }
}

/// Token exchange minting a session from `X-Idp-Token: <session id>`
pub struct HeaderTokenExchange;

#[async_trait]
impl IncomingTokenSessionCreator for HeaderTokenExchange {
    async fn create_session(
        &self,
        querier: &CachingQuerier,
        _config: &Config,
        _policy: Option<&Policy>,
        request: &IncomingRequest,
    ) -> Result<Session, TokenExchangeError> {
        let token = request
            .header("X-Idp-Token")
            .ok_or(TokenExchangeError::NoSessionFound)?;
        if token == "bad" {
            return Err(TokenExchangeError::InvalidSession("idp rejected token".into()));
        }

        let session = Session::new(token, format!("user-{}", token));
        let written = querier.put(vec![session.to_record()]).await?;

        Ok(Session {
            version: written[0].version,
            ..session
        })
    }
}

pub struct Harness {
    pub authorize: Authorize,
    pub broker: Arc<CountingDataBroker>,
    pub evaluator: Arc<RecordingEvaluator>,
}

pub fn harness(evaluator: Arc<RecordingEvaluator>, policies: Vec<Policy>) -> Harness {
    let broker = CountingDataBroker::new();
    let state = AuthorizeState::new(evaluator.clone(), broker.clone())
        .with_session_store(Arc::new(BearerSessionStore))
        .with_token_session_creator(Arc::new(HeaderTokenExchange));
    let config = Config::new(Options {
        policies,
        ..Default::default()
    });

    Harness {
        authorize: Authorize::new(config, state, CacheConfig::default()),
        broker,
        evaluator,
    }
}

/// Check request for `GET https://app.example.com<path>` on `route_id`
pub fn check_request(route_id: u64, path: &str, headers: &[(&str, &str)]) -> CheckRequest {
    CheckRequest {
        attributes: AttributeContext {
            request: Some(RequestAttributes {
                http: Some(HttpRequest {
                    id: "envoy-1".into(),
                    method: "GET".into(),
                    scheme: "https".into(),
                    host: "app.example.com".into(),
                    path: path.into(),
                    headers: headers.iter().map(|(k, v)| HeaderValue::new(*k, *v)).collect(),
                    ..Default::default()
                }),
            }),
            context_extensions: make_context_extensions(false, route_id),
            ..Default::default()
        },
    }
}
