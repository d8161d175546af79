//! # Sentinel Authorize
//!
//! Policy-decision core of an identity-aware access proxy. For every request
//! the edge proxy forwards through its external-authorization filter, the
//! service decides ALLOW or DENY and, when denying, synthesizes the response.
//!
//! ## Pipeline
//!
//! ```text
//! CheckRequest ─→ http (URL/headers) + client_cert ─→ RequestHttp
//!                        │
//!                        ├─→ policy (route id) ─→ Option<Policy>
//!                        │
//!                        └─→ resolver (token exchange → session store → record store)
//!                                 │             via storage::CachingQuerier
//!                                 ↓
//!                         EvaluationRequest ─→ Evaluator ─→ CheckResponse + AuditEntry
//! ```
//!
//! The evaluation engine, the record store, and the session store are
//! consumed through the [`Evaluator`], [`DataBrokerClient`] and
//! [`SessionStore`] traits.

pub mod check;
pub mod client_cert;
pub mod config;
pub mod databroker;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod http;
pub mod policy;
pub mod resolver;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod telemetry;

pub use check::{CheckRequest, CheckResponse};
pub use client_cert::ClientCertificateInfo;
pub use config::{AuthorizeConfig, Config, Options, RuntimeFlags};
pub use databroker::{DataBrokerClient, DataBrokerError, InMemoryDataBroker, Record};
pub use engine::{Authorize, AuthorizeState};
pub use error::{CheckError, Result};
pub use evaluator::{Decision, Denial, EvaluateError, EvaluationRequest, EvaluationResult, Evaluator};
pub use http::{IncomingRequest, RequestHttp, RequestUrl};
pub use policy::Policy;
pub use session::{
    Identity, IncomingTokenSessionCreator, ServiceAccount, Session, SessionState, SessionStore, User,
};
pub use snapshot::AtomicSnapshot;
pub use storage::{CacheConfig, CachingQuerier, RecordCache};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
