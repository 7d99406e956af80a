use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use querybeat_core::{ConnectionConfig, QueryPayload};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{ExecutionError, Result};

/// Upper bound on closing a connection after the attempt is over.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Opens connections to an externally described data source.
///
/// Stateless: every call gets the full [`ConnectionConfig`] and returns a
/// fresh connection. Nothing is cached or shared between calls.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn SourceConnection>>;
}

/// One live connection, owned by a single attempt.
#[async_trait]
pub trait SourceConnection: Send {
    /// Run `query` and capture every column and row.
    async fn fetch(&mut self, query: &str) -> Result<QueryPayload>;

    /// Release the connection. Errors are the implementation's to log.
    async fn close(self: Box<Self>);
}

/// Scopes one connection to one attempt.
///
/// [`run_query`](ConnectionBroker::run_query) opens a connection, runs the
/// query and closes the connection on every exit path, all inside a single
/// deadline.
#[derive(Clone)]
pub struct ConnectionBroker {
    connector: Arc<dyn Connector>,
    attempt_timeout: Duration,
}

impl ConnectionBroker {
    pub fn new(connector: Arc<dyn Connector>, attempt_timeout: Duration) -> Self {
        Self {
            connector,
            attempt_timeout,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Connect, fetch, close. Connect and fetch share one deadline of
    /// `attempt_timeout`; expiry yields [`ExecutionError::Timeout`].
    pub async fn run_query(&self, config: &ConnectionConfig, query: &str) -> Result<QueryPayload> {
        let deadline = Instant::now() + self.attempt_timeout;
        let secs = self.attempt_timeout.as_secs().max(1);

        let mut conn = match timeout_at(deadline, self.connector.connect(config)).await {
            Ok(conn) => conn?,
            Err(_) => {
                warn!(source = %config.name, "connect did not finish within the attempt timeout");
                return Err(ExecutionError::Timeout { secs });
            }
        };
        debug!(source = %config.name, host = %config.host, "source connection opened");

        let result = match timeout_at(deadline, conn.fetch(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(source = %config.name, "query did not finish within the attempt timeout");
                Err(ExecutionError::Timeout { secs })
            }
        };

        // a close that hangs is abandoned; dropping the connection releases it
        if timeout(CLOSE_GRACE, conn.close()).await.is_err() {
            warn!(source = %config.name, "source connection close timed out");
        } else {
            debug!(source = %config.name, "source connection closed");
        }
        result
    }
}
