//! Single-flight token refresh shared by every request of one credential owner.
//!
//! [`RefreshCoordinator::refresh`] may be called from any number of tasks at once. The first
//! caller that finds the coordinator idle starts the network call on a detached tokio task; every
//! later caller joins the waiter list. When the call settles the credential store is updated in a
//! single write, hooks fire once, and every waiter receives the same outcome in arrival order.
//! Dropping a waiting future never strands the coordinator: the detached task always settles.

mod metrics;
mod renewer;

pub use metrics::RefreshMetrics;
pub use renewer::{AuthServiceRenewer, RenewFuture, TokenRenewer};

pub(crate) use renewer::DEFAULT_BACKEND;

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialStore, Session, StampedToken, TokenSecret},
	error::RefreshError,
	obs::{self, OpKind, OpOutcome, OpSpan},
	telemetry::CategoryLogger,
};

/// Callback invoked once per successful refresh cycle.
pub type RefreshHook = Arc<dyn Fn(&TokenSecret, &Session) + Send + Sync>;
/// Callback invoked once per failed refresh cycle.
pub type RefreshErrorHook = Arc<dyn Fn(&RefreshError) + Send + Sync>;

type Settled = std::result::Result<StampedToken, RefreshError>;

#[derive(Debug, Default)]
enum RefreshState {
	#[default]
	Idle,
	InFlight {
		waiters: Vec<oneshot::Sender<Settled>>,
	},
}

#[derive(Clone, Default)]
struct Hooks {
	on_refresh: Option<RefreshHook>,
	on_refresh_error: Option<RefreshErrorHook>,
}

struct Inner {
	credentials: CredentialStore,
	renewer: Arc<dyn TokenRenewer>,
	state: Mutex<RefreshState>,
	hooks: RwLock<Hooks>,
	logger: RwLock<Option<CategoryLogger>>,
	metrics: RefreshMetrics,
}

/// Cloneable handle coordinating refreshes for one [`CredentialStore`].
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}
impl RefreshCoordinator {
	/// Creates a coordinator that renews `credentials` through `renewer`.
	pub fn new(credentials: CredentialStore, renewer: Arc<dyn TokenRenewer>) -> Self {
		Self {
			inner: Arc::new(Inner {
				credentials,
				renewer,
				state: Mutex::new(RefreshState::Idle),
				hooks: RwLock::new(Hooks::default()),
				logger: RwLock::new(None),
				metrics: RefreshMetrics::default(),
			}),
		}
	}

	/// Shared credential store updated by successful refreshes.
	pub fn credentials(&self) -> &CredentialStore {
		&self.inner.credentials
	}

	/// Refresh counters for this coordinator.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Returns `true` while a refresh call is outstanding.
	pub fn is_in_flight(&self) -> bool {
		matches!(*self.inner.state.lock(), RefreshState::InFlight { .. })
	}

	/// Installs the hook fired after each successful refresh.
	pub fn set_on_refresh<F>(&self, hook: F)
	where
		F: 'static + Fn(&TokenSecret, &Session) + Send + Sync,
	{
		self.inner.hooks.write().on_refresh = Some(Arc::new(hook));
	}

	/// Installs the hook fired after each failed refresh.
	pub fn set_on_refresh_error<F>(&self, hook: F)
	where
		F: 'static + Fn(&RefreshError) + Send + Sync,
	{
		self.inner.hooks.write().on_refresh_error = Some(Arc::new(hook));
	}

	/// Reports refresh cycles through `logger` in addition to local tracing.
	pub fn set_logger(&self, logger: CategoryLogger) {
		*self.inner.logger.write() = Some(logger);
	}

	/// Refreshes the access token, joining an in-flight refresh when one exists.
	pub async fn refresh(&self) -> Result<TokenSecret, RefreshError> {
		self.refresh_stamped(None).await.map(|stamped| stamped.token)
	}

	/// Refreshes unless the store already moved past `observed_generation`.
	///
	/// Used by the executor after a 401: when another refresh settled while the rejected request
	/// was on the wire, the current token is returned without a new network call.
	pub(crate) async fn refresh_after(&self, observed_generation: u64) -> Settled {
		self.refresh_stamped(Some(observed_generation)).await
	}

	async fn refresh_stamped(&self, observed_generation: Option<u64>) -> Settled {
		let receiver = {
			let mut state = self.inner.state.lock();

			if let Some(observed) = observed_generation {
				let current = self.inner.credentials.current();

				if current.generation > observed {
					return Ok(current);
				}
			}

			let (sender, receiver) = oneshot::channel();

			match &mut *state {
				RefreshState::InFlight { waiters } => waiters.push(sender),
				RefreshState::Idle => {
					let credential = self.inner.credentials.credential();

					if !credential.can_refresh() {
						return Err(RefreshError::NoRefreshToken);
					}

					*state = RefreshState::InFlight { waiters: vec![sender] };

					tokio::spawn(self.clone().run(credential));
				},
			}

			receiver
		};

		receiver.await.unwrap_or_else(|_| {
			Err(RefreshError::network("Refresh task ended before settling"))
		})
	}

	async fn run(self, credential: Credential) {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, "run");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.inner.metrics.record_attempt();

		if let Some(logger) = self.logger() {
			logger.info("Refreshing access token.");
		}

		let renewer = self.inner.renewer.clone();
		// A panicking renewer must still settle every waiter.
		let renewal =
			tokio::spawn(span.instrument(async move { renewer.renew(&credential).await }));
		let outcome = renewal.await.unwrap_or_else(|e| {
			Err(RefreshError::network(format!("Token renewer stopped before answering: {e}")))
		});

		self.settle(outcome);
	}

	fn logger(&self) -> Option<CategoryLogger> {
		self.inner.logger.read().clone()
	}

	fn settle(&self, outcome: std::result::Result<Session, RefreshError>) {
		let (waiters, result) = {
			let mut state = self.inner.state.lock();
			let result = outcome.map(|session| {
				let stamped = self
					.inner
					.credentials
					.install(session.token.clone(), session.refresh_token.clone());

				(stamped, session)
			});
			let waiters = match std::mem::take(&mut *state) {
				RefreshState::InFlight { waiters } => waiters,
				RefreshState::Idle => Vec::new(),
			};

			(waiters, result)
		};
		let hooks = self.inner.hooks.read().clone();
		let logger = self.logger();

		match &result {
			Ok((stamped, session)) => {
				self.inner.metrics.record_success();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Success);
				#[cfg(feature = "tracing")]
				tracing::debug!(generation = stamped.generation, waiters = waiters.len(), "Token refreshed.");

				if let Some(logger) = &logger {
					logger.info("Token refreshed.");
				}
				if let Some(hook) = &hooks.on_refresh {
					hook(&stamped.token, session);
				}
			},
			Err(e) => {
				self.inner.metrics.record_failure();
				obs::record_op_outcome(OpKind::Refresh, OpOutcome::Failure);
				#[cfg(feature = "tracing")]
				tracing::warn!(error = %e, waiters = waiters.len(), "Token refresh failed.");

				if let Some(logger) = &logger {
					logger.error_with("Token refresh failed.", e);
				}
				if let Some(hook) = &hooks.on_refresh_error {
					hook(e);
				}
			},
		}

		let settled = result.map(|(stamped, _)| stamped);

		for waiter in waiters {
			let _ = waiter.send(settled.clone());
		}
	}

	#[cfg(test)]
	fn waiter_count(&self) -> usize {
		match &*self.inner.state.lock() {
			RefreshState::InFlight { waiters } => waiters.len(),
			RefreshState::Idle => 0,
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("in_flight", &self.is_in_flight())
			.field("metrics", &self.inner.metrics)
			.finish()
	}
}
