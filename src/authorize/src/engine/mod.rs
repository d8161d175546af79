//! Check orchestration
//!
//! Ties the pipeline together for one check:
//!
//! ```text
//! CheckRequest → translate → match policy → resolve identity → evaluate → respond
//!                                               ↓                  ↓          ↓
//!                                        [RecordCache]        [Evaluator]  [Audit] [Metrics]
//! ```
//!
//! Configuration and the collaborators built for it are read once per check
//! from a single atomically swapped snapshot; a reload never changes what an
//! in-flight check sees, and never pairs a new policy set with old
//! collaborators.

pub mod audit;
pub mod metrics;
pub mod response;

pub use audit::{AuditEntry, AuditLogger, AuditStats};
pub use metrics::{CheckMetrics, MetricsCollector};
pub use response::{denied_response, ok_response, DeniedRender};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::check::{CheckRequest, CheckResponse};
use crate::client_cert::client_certificate_info;
use crate::config::Config;
use crate::databroker::DataBrokerClient;
use crate::error::{CheckError, Result};
use crate::evaluator::{Decision, Denial, EvaluationRequest, Evaluator, RequestSession};
use crate::http::{IncomingRequest, RequestHttp};
use crate::policy::{find_matching_policy, Policy};
use crate::resolver::SessionResolver;
use crate::session::{IncomingTokenSessionCreator, NoSessionStore, NoTokenExchange, SessionStore};
use crate::snapshot::AtomicSnapshot;
use crate::storage::{CacheConfig, CachingQuerier, RecordCache};

/// Collaborators a check talks to
#[derive(Clone)]
pub struct AuthorizeState {
    pub evaluator: Arc<dyn Evaluator>,
    pub databroker: Arc<dyn DataBrokerClient>,
    pub session_store: Arc<dyn SessionStore>,
    pub token_session_creator: Arc<dyn IncomingTokenSessionCreator>,
}

impl AuthorizeState {
    /// State without session cookies or incoming-token exchange
    pub fn new(evaluator: Arc<dyn Evaluator>, databroker: Arc<dyn DataBrokerClient>) -> Self {
        Self {
            evaluator,
            databroker,
            session_store: Arc::new(NoSessionStore),
            token_session_creator: Arc::new(NoTokenExchange),
        }
    }

    pub fn with_session_store(mut self, session_store: Arc<dyn SessionStore>) -> Self {
        self.session_store = session_store;
        self
    }

    pub fn with_token_session_creator(mut self, creator: Arc<dyn IncomingTokenSessionCreator>) -> Self {
        self.token_session_creator = creator;
        self
    }
}

/// Configuration and the collaborators built for it, swapped as one unit
struct Current {
    config: Arc<Config>,
    state: AuthorizeState,
}

/// Request facts derived before identity resolution
struct Prepared {
    incoming: IncomingRequest,
    request_id: String,
    route_id: u64,
    http: RequestHttp,
    policy: Option<Policy>,
}

/// How a finished check is counted
enum Tally {
    Decision { allowed: bool },
    InvalidSession,
    Error,
}

/// A check's outcome together with the audit entry and tally it records
type Decided = (Result<CheckResponse>, AuditEntry, Tally);

/// The authorization service
pub struct Authorize {
    current: AtomicSnapshot<Current>,

    /// Process-wide record cache, shared by every check
    cache: Arc<RecordCache>,

    audit: Arc<AuditLogger>,
    metrics: Arc<MetricsCollector>,
}

impl Authorize {
    pub fn new(config: Config, state: AuthorizeState, cache_config: CacheConfig) -> Self {
        info!(
            policies = config.options.all_policies().count(),
            cache_capacity = cache_config.capacity,
            "authorize service initialized"
        );

        Self {
            current: AtomicSnapshot::new(Current {
                config: Arc::new(config),
                state,
            }),
            cache: Arc::new(RecordCache::new(cache_config)),
            audit: Arc::new(AuditLogger::new()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Swap in a new configuration and the collaborators built for it.
    ///
    /// Checks already running keep the pair they started with.
    pub fn on_config_change(&self, config: Config, state: AuthorizeState) {
        info!(
            policies = config.options.all_policies().count(),
            "authorize configuration updated"
        );
        self.current.store(Current {
            config: Arc::new(config),
            state,
        });
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        self.current.load().config.clone()
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Decide a check.
    ///
    /// A denial is `Ok`. Errors are infrastructure faults the proxy handles
    /// (and may retry) itself. Dropping the future abandons any in-flight
    /// record-store or evaluation call without auditing it; use
    /// [`Authorize::check_with_cancellation`] or
    /// [`Authorize::check_with_timeout`] to abandon a check on purpose.
    pub async fn check(&self, request: &CheckRequest) -> Result<CheckResponse> {
        self.check_until(request, std::future::pending()).await
    }

    /// [`Authorize::check`], abandoned with [`CheckError::Cancelled`] as
    /// soon as `cancel` fires
    pub async fn check_with_cancellation(
        &self,
        request: &CheckRequest,
        cancel: &CancellationToken,
    ) -> Result<CheckResponse> {
        let cancelled = async {
            cancel.cancelled().await;
            debug!("check cancelled by caller");
            CheckError::Cancelled
        };
        self.check_until(request, cancelled).await
    }

    /// [`Authorize::check`], abandoned with [`CheckError::Timeout`] once
    /// `timeout` elapses
    pub async fn check_with_timeout(&self, request: &CheckRequest, timeout: Duration) -> Result<CheckResponse> {
        let expired = async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout_ms = timeout.as_millis() as u64, "check timed out");
            CheckError::Timeout(timeout)
        };
        self.check_until(request, expired).await
    }

    /// Run a check unless `abandon` resolves first. An abandoned check is
    /// audited and counted with the error `abandon` yields. Only remote work
    /// is raced; metrics and audit are written once, after the race.
    async fn check_until<F>(&self, request: &CheckRequest, abandon: F) -> Result<CheckResponse>
    where
        F: Future<Output = CheckError>,
    {
        let started = Instant::now();
        let current = self.current.load();

        let prepared = match prepare(request, &current.config) {
            Ok(prepared) => prepared,
            Err(err) => {
                error!(error = %err, "error building evaluator request");
                self.metrics.record_error().await;
                return Err(err);
            }
        };
        let entry = AuditEntry::new(
            &prepared.request_id,
            &prepared.http,
            prepared.route_id,
            prepared.policy.as_ref(),
        );

        let (result, entry, tally) = tokio::select! {
            biased;
            err = abandon => {
                let entry = entry.with_error(err.kind());
                (Err(err), entry, Tally::Error)
            }
            decided = self.decide(&current.state, &current.config, request, prepared, entry.clone()) => decided,
        };

        match tally {
            Tally::Decision { allowed } => self.metrics.record_decision(allowed).await,
            Tally::InvalidSession => self.metrics.record_invalid_session().await,
            Tally::Error => self.metrics.record_error().await,
        }
        let latency = started.elapsed();
        self.metrics.record_latency(latency).await;
        self.audit.log_check(entry.with_latency(latency)).await;

        result
    }

    async fn decide(
        &self,
        state: &AuthorizeState,
        config: &Config,
        request: &CheckRequest,
        prepared: Prepared,
        entry: AuditEntry,
    ) -> Decided {
        let Prepared {
            incoming,
            request_id,
            http,
            policy,
            ..
        } = prepared;

        let querier = CachingQuerier::new(state.databroker.clone(), self.cache.clone());
        let resolver = SessionResolver::new(
            &querier,
            state.session_store.as_ref(),
            state.token_session_creator.as_ref(),
            config,
            &request_id,
        );

        let resolved = match resolver.resolve(policy.as_ref(), &incoming).await {
            Ok(resolved) => resolved,
            Err(CheckError::InvalidSession(_)) => {
                // rejected credentials never reach the evaluator
                let response = denied_response(
                    &Denial::forbidden(),
                    DeniedRender {
                        request_id: &request_id,
                        json: incoming.accepts_json(),
                        traces: None,
                    },
                );
                return (Ok(response), entry.with_denial_status(403), Tally::InvalidSession);
            }
            Err(err) => {
                error!(request_id = %request_id, error = %err, "error loading session");
                let entry = entry.with_error(err.kind());
                return (Err(err), entry, Tally::Error);
            }
        };

        let evaluation = EvaluationRequest {
            policy,
            http,
            session: RequestSession {
                id: resolved.identity.id().to_string(),
            },
            is_internal: request.is_internal(),
        };
        let entry = entry.with_identity(&resolved);

        let result = match state.evaluator.evaluate(&evaluation).await {
            Ok(result) => result,
            Err(err) => {
                error!(request_id = %request_id, error = %err, "error during policy evaluation");
                let err = CheckError::from(err);
                let entry = entry.with_error(err.kind());
                return (Err(err), entry, Tally::Error);
            }
        };

        let show_error_details = evaluation.policy.as_ref().is_some_and(|p| p.show_error_details);
        let response = match &result.decision {
            Decision::Allow => ok_response(&result.headers),
            Decision::Deny(denial) => denied_response(
                denial,
                DeniedRender {
                    request_id: &request_id,
                    json: incoming.accepts_json(),
                    traces: show_error_details.then_some(result.traces.as_slice()),
                },
            ),
        };

        let tally = Tally::Decision {
            allowed: result.is_allowed(),
        };
        (Ok(response), entry.with_result(&result), tally)
    }
}

/// Translate the wire request and match its policy
fn prepare(request: &CheckRequest, config: &Config) -> Result<Prepared> {
    let incoming = IncomingRequest::from_check_request(request, &config.options.runtime_flags)?;
    let route_id = request.route_id()?;

    let request_id = incoming.request_id();
    let http = RequestHttp::new(
        incoming.method.clone(),
        incoming.url.clone(),
        incoming.headers.clone(),
        client_certificate_info(request.client_certificate_metadata()),
        request.source_address(),
    );
    let policy = find_matching_policy(&config.options, route_id).cloned();
    if policy.is_none() {
        debug!(request_id = %request_id, route_id, "no policy matches route");
    }

    Ok(Prepared {
        incoming,
        request_id,
        route_id,
        http,
        policy,
    })
}
