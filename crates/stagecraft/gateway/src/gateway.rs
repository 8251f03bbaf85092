//! The resilient gateway.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::auth::{AuthProvider, Credential};
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::request::{ApiRequest, ApiResponse, CallOutcome};
use crate::transport::Transport;

/// Anything that can issue a control-plane call and return a terminal result.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse>;

    /// Breaker states, for status reporting.
    fn circuits(&self) -> Vec<CircuitSnapshot> {
        Vec::new()
    }
}

/// Retry, backoff, credential refresh and circuit breaking around a
/// [`Transport`].
pub struct ResilientGateway {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
    breakers: CircuitBreakerRegistry,
    credential: Mutex<Option<Credential>>,
}

impl ResilientGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.clone(), clock.clone());
        Self {
            transport,
            auth,
            clock,
            config,
            breakers,
            credential: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    async fn current_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.credential.lock().clone() {
            return Ok(credential);
        }
        let credential = self.auth.credential().await?;
        *self.credential.lock() = Some(credential.clone());
        Ok(credential)
    }

    async fn refresh_credential(&self) -> Result<()> {
        let credential = self.auth.refresh().await?;
        *self.credential.lock() = Some(credential);
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for ResilientGateway {
    #[instrument(
        skip(self, request),
        fields(endpoint_class = %request.endpoint_class, method = %request.method, path = %request.path)
    )]
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        let class = request.endpoint_class.clone();
        let breaker = self.breakers.get_or_create(&class);
        let max_sends = self.config.retry.max_retries.saturating_add(1);

        let mut attempts = 0u32;
        let mut refreshed = false;

        loop {
            let Some(permit) = breaker.try_permit() else {
                debug!("Circuit open, call refused");
                return Err(GatewayError::CircuitOpen {
                    endpoint_class: class,
                });
            };

            let credential = match self.current_credential().await {
                Ok(credential) => credential,
                Err(e) => {
                    permit.release();
                    return Err(e);
                }
            };

            attempts += 1;
            match self.transport.send(&request, &credential).await {
                CallOutcome::Success(response) => {
                    permit.success();
                    debug!(status = response.status, attempts, "Call succeeded");
                    return Ok(response);
                }
                CallOutcome::NonTransient {
                    status,
                    message,
                    error_code,
                } => {
                    // The endpoint is reachable, so this does not count against the breaker
                    permit.success();
                    debug!(status, ?error_code, "Call rejected");
                    return Err(GatewayError::NonTransientFailure {
                        endpoint_class: class,
                        status,
                        message,
                        error_code,
                    });
                }
                CallOutcome::Unauthorized { message } => {
                    permit.release();
                    if refreshed {
                        warn!(%message, "Credential rejected after refresh");
                        return Err(GatewayError::Unauthorized {
                            endpoint_class: class,
                        });
                    }
                    debug!("Credential rejected, refreshing once");
                    refreshed = true;
                    attempts -= 1;
                    self.refresh_credential().await?;
                }
                CallOutcome::Transient { status, message } => {
                    permit.failure();
                    warn!(?status, %message, attempt = attempts, max_sends, "Transient failure");

                    if breaker.state() == CircuitState::Open {
                        return Err(GatewayError::CircuitOpen {
                            endpoint_class: class,
                        });
                    }
                    if attempts >= max_sends {
                        return Err(GatewayError::ExhaustedRetries {
                            endpoint_class: class,
                            attempts,
                            last_error: message,
                        });
                    }

                    let delay = self.config.retry.backoff(attempts);
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    fn circuits(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshots()
    }
}

impl std::fmt::Debug for ResilientGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGateway")
            .field("config", &self.config)
            .field("breakers", &self.breakers)
            .finish()
    }
}
