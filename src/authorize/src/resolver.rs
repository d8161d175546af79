//! Caller identity resolution
//!
//! Strict precedence, first success wins:
//!
//! 1. mint a session from an incoming identity-provider token
//! 2. decode the request's own session reference (cookie / bearer)
//! 3. fetch the referenced session or service account from the record store
//!
//! A resolved identity then gets its user profile attached, best effort.

use chrono::Utc;
use tracing::{debug, info};

use crate::config::Config;
use crate::databroker::{DataBrokerError, SERVICE_ACCOUNT_TYPE, SESSION_TYPE, USER_TYPE};
use crate::error::{CheckError, Result};
use crate::http::IncomingRequest;
use crate::policy::Policy;
use crate::session::{
    Identity, IncomingTokenSessionCreator, SessionState, SessionStore, SessionStoreError,
    TokenExchangeError, User,
};
use crate::storage::CachingQuerier;

/// Outcome of one resolution step
#[derive(Debug)]
pub enum Resolution<T> {
    Resolved(T),
    /// The step does not apply to this request; try the next one
    NotApplicable,
}

/// The caller behind a check
#[derive(Debug, Clone, Default)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub user: Option<User>,
}

/// Resolves the identity for a single check
pub struct SessionResolver<'a> {
    querier: &'a CachingQuerier,
    session_store: &'a dyn SessionStore,
    token_session_creator: &'a dyn IncomingTokenSessionCreator,
    config: &'a Config,
    request_id: &'a str,
}

impl<'a> SessionResolver<'a> {
    pub fn new(
        querier: &'a CachingQuerier,
        session_store: &'a dyn SessionStore,
        token_session_creator: &'a dyn IncomingTokenSessionCreator,
        config: &'a Config,
        request_id: &'a str,
    ) -> Self {
        Self {
            querier,
            session_store,
            token_session_creator,
            config,
            request_id,
        }
    }

    /// Resolve identity and user profile.
    ///
    /// Errors are terminal: [`CheckError::InvalidSession`] for a rejected
    /// credential, [`CheckError::DependencyUnavailable`] when the record
    /// store is unreachable, [`CheckError::SessionCreation`] when token
    /// exchange fails otherwise.
    pub async fn resolve(&self, policy: Option<&Policy>, request: &IncomingRequest) -> Result<ResolvedIdentity> {
        let identity = self.load_identity(policy, request).await?;
        let user = self.load_user(&identity).await;

        Ok(ResolvedIdentity { identity, user })
    }

    async fn load_identity(&self, policy: Option<&Policy>, request: &IncomingRequest) -> Result<Identity> {
        if let Resolution::Resolved(identity) = self.exchange_incoming_token(policy, request).await? {
            return Ok(identity);
        }

        let state = match self.load_session_state(request)? {
            Resolution::Resolved(state) => state,
            Resolution::NotApplicable => return Ok(Identity::Absent),
        };

        self.lookup_credential(&state).await
    }

    /// Step 1: incoming identity-provider token
    async fn exchange_incoming_token(
        &self,
        policy: Option<&Policy>,
        request: &IncomingRequest,
    ) -> Result<Resolution<Identity>> {
        let result = self
            .token_session_creator
            .create_session(self.querier, self.config, policy, request)
            .await;

        match result {
            Ok(session) => {
                debug!(request_id = self.request_id, session_id = %session.id, "created session from incoming token");
                Ok(Resolution::Resolved(Identity::Session(session)))
            }
            Err(TokenExchangeError::NoSessionFound) => Ok(Resolution::NotApplicable),
            Err(err) => {
                info!(request_id = self.request_id, error = %err, "error creating session for incoming idp token");
                Err(match err {
                    TokenExchangeError::InvalidSession(msg) => CheckError::InvalidSession(msg),
                    TokenExchangeError::DataBroker(e) if e.is_unavailable() => {
                        CheckError::DependencyUnavailable(e.to_string())
                    }
                    other => CheckError::SessionCreation(other.to_string()),
                })
            }
        }
    }

    /// Step 2: the request's own session reference
    fn load_session_state(&self, request: &IncomingRequest) -> Result<Resolution<SessionState>> {
        match self.session_store.load_session_state_and_check_idp(request) {
            Ok(Some(state)) => Ok(Resolution::Resolved(state)),
            Ok(None) => Ok(Resolution::NotApplicable),
            Err(SessionStoreError::InvalidSession(msg)) => {
                info!(request_id = self.request_id, reason = %msg, "rejecting invalid session");
                Err(CheckError::InvalidSession(msg))
            }
            Err(err @ SessionStoreError::Malformed(_)) => {
                debug!(request_id = self.request_id, error = %err, "ignoring unreadable session");
                Ok(Resolution::NotApplicable)
            }
        }
    }

    /// Step 3: the referenced record
    async fn lookup_credential(&self, state: &SessionState) -> Result<Identity> {
        match get_session_or_service_account(self.querier, &state.id, state.databroker_record_version).await {
            Ok(identity) => Ok(identity),
            Err(err) if err.is_unavailable() => {
                debug!(
                    request_id = self.request_id,
                    error = %err,
                    "temporary error checking authorization: record store unavailable"
                );
                Err(CheckError::DependencyUnavailable(err.to_string()))
            }
            Err(err) => {
                info!(
                    request_id = self.request_id,
                    session_id = %state.id,
                    error = %err,
                    "clearing session due to missing or invalid session or service account"
                );
                Ok(Identity::Absent)
            }
        }
    }

    async fn load_user(&self, identity: &Identity) -> Option<User> {
        let user_id = identity.user_id()?;

        let user = match self.querier.get(USER_TYPE, user_id, 0).await {
            Ok(record) => User::from_record(&record).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match user {
            Ok(user) => Some(user),
            Err(reason) => {
                debug!(request_id = self.request_id, user_id, reason = %reason, "user profile unavailable");
                None
            }
        }
    }
}

/// Fetch a session record, falling back to a service account with the same
/// id. Expired or undecodable credentials are reported as
/// [`DataBrokerError::InvalidRecord`].
pub async fn get_session_or_service_account(
    querier: &CachingQuerier,
    id: &str,
    min_version: u64,
) -> std::result::Result<Identity, DataBrokerError> {
    let record = match querier.get(SESSION_TYPE, id, min_version).await {
        Err(e) if e.is_not_found() => querier.get(SERVICE_ACCOUNT_TYPE, id, min_version).await?,
        other => other?,
    };

    Identity::from_record(&record, Utc::now()).map_err(|e| DataBrokerError::InvalidRecord(e.to_string()))
}
