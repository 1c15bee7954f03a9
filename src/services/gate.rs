//! Gate operations. Each one names the single status (per flow) it may start
//! from and hands the move to [`RequestStateMachine`].
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::service_request::{self, RequestStatus, RequestType},
    errors::ServiceError,
    services::{
        workflow::{DriverInfo, RequestStateMachine, TransitionExtra},
        Actor,
    },
};

use RequestStatus as S;
use RequestType::{Export, Import};

#[derive(Clone)]
pub struct GateOrchestrator {
    machine: RequestStateMachine,
}

impl GateOrchestrator {
    pub fn new(machine: RequestStateMachine) -> Self {
        Self { machine }
    }

    async fn run<G>(
        &self,
        op: &'static str,
        request_id: Uuid,
        to: RequestStatus,
        actor: &Actor,
        extra: TransitionExtra,
        guard: G,
    ) -> Result<service_request::Model, ServiceError>
    where
        G: Fn(RequestType, RequestStatus) -> bool + Send,
    {
        let result = self
            .machine
            .transition_if(request_id, to, actor, extra, guard)
            .await;
        let outcome = if result.is_ok() { "ok" } else { "refused" };
        metrics::counter!("depot.gate.operations", 1, "op" => op, "outcome" => outcome);
        result
    }

    /// Books the truck appointment.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn schedule(
        &self,
        request_id: Uuid,
        appointment_at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        let extra = TransitionExtra {
            appointment_at: Some(appointment_at),
            ..Default::default()
        };
        self.run("schedule", request_id, S::Scheduled, actor, extra, |ty, from| {
            matches!((ty, from), (Import, S::Pending) | (Export, S::PickContainer))
        })
        .await
    }

    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn forward(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        self.run(
            "forward",
            request_id,
            S::Forwarded,
            actor,
            TransitionExtra::default(),
            |_, from| from == S::Scheduled,
        )
        .await
    }

    /// Lets a forwarded truck in. Driver details may be filled in later.
    #[instrument(skip(self, driver, actor), fields(request_id = %request_id))]
    pub async fn approve(
        &self,
        request_id: Uuid,
        driver: Option<DriverInfo>,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        if let Some(driver) = &driver {
            driver.validate()?;
        }
        let extra = TransitionExtra {
            driver,
            ..Default::default()
        };
        self.run("approve", request_id, S::GateIn, actor, extra, |_, from| {
            from == S::Forwarded
        })
        .await
    }

    /// Gate acceptance with the driver and truck recorded.
    #[instrument(skip(self, driver, actor), fields(request_id = %request_id))]
    pub async fn accept_gate(
        &self,
        request_id: Uuid,
        driver: DriverInfo,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        driver.validate()?;
        let extra = TransitionExtra {
            driver: Some(driver),
            ..Default::default()
        };
        self.run("accept_gate", request_id, S::GateIn, actor, extra, |_, from| {
            from == S::Forwarded
        })
        .await
    }

    #[instrument(skip(self, reason, actor), fields(request_id = %request_id))]
    pub async fn reject(
        &self,
        request_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "a gate rejection needs a reason".to_string(),
            ));
        }
        let extra = TransitionExtra {
            reason: Some(reason.to_string()),
            ..Default::default()
        };
        self.run("reject", request_id, S::Rejected, actor, extra, |_, from| {
            from == S::Forwarded
        })
        .await
    }

    /// Walk-in import: straight from `NEW_REQUEST` through the gate.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn check_in(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        self.run(
            "check_in",
            request_id,
            S::GateIn,
            actor,
            TransitionExtra::default(),
            |ty, from| ty == Import && from == S::NewRequest,
        )
        .await
    }

    /// Export container lifted onto the truck.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn check_out(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        self.run(
            "check_out",
            request_id,
            S::InCar,
            actor,
            TransitionExtra::default(),
            |ty, from| ty == Export && from == S::DoneLifting,
        )
        .await
    }

    /// Truck leaves the depot. Imports may also leave straight from `FORKLIFTING`.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn gate_out(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        self.run(
            "gate_out",
            request_id,
            S::GateOut,
            actor,
            TransitionExtra::default(),
            |ty, from| {
                matches!(
                    (ty, from),
                    (Import, S::InYard) | (Import, S::Forklifting) | (Export, S::InCar)
                )
            },
        )
        .await
    }

    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn complete(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        self.run(
            "complete",
            request_id,
            S::Completed,
            actor,
            TransitionExtra::default(),
            |_, from| from == S::GateOut,
        )
        .await
    }
}
