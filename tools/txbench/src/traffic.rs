use tracing::error;
use txbench_signer::TransactionSigner;

use crate::classify::{classify_response, ResponseClass};
use crate::engine::{RequestLifecycle, ResponseEvent};
use crate::error::Result;
use crate::payload::{Clock, PayloadGenerator};

/// Request hooks shared by the coordinator and every worker: a fresh signed
/// body per request, and a count of service-reported errors.
pub struct SignedTraffic<S, C> {
    generator: PayloadGenerator<S, C>,
    role: String,
    error_count: u64,
}

impl<S: TransactionSigner, C: Clock> SignedTraffic<S, C> {
    pub fn new(generator: PayloadGenerator<S, C>, role: impl Into<String>) -> Self {
        Self {
            generator,
            role: role.into(),
            error_count: 0,
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }
}

impl<S: TransactionSigner, C: Clock> RequestLifecycle for SignedTraffic<S, C> {
    fn on_request_needed(&mut self, _connection: usize) -> Result<Vec<u8>> {
        self.generator.produce_body()
    }

    fn on_response(&mut self, event: &ResponseEvent<'_>) {
        if classify_response(event.body) == ResponseClass::ApplicationError {
            self.error_count += 1;
            error!(
                role = %self.role,
                status = event.status,
                response = %String::from_utf8_lossy(event.body),
                "service reported an error"
            );
        }
    }
}
