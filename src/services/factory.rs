use std::sync::Arc;

use crate::{
    collaborators::{AuditSink, DocumentStore, ReferenceData},
    db::DbPool,
    events::EventSender,
    services::{
        forklift::ForkliftTaskCoordinator, gate::GateOrchestrator, invoicing::InvoiceService,
        repair::RepairTicketCoordinator, requests::RequestService, seals::SealAllocator,
        workflow::RequestStateMachine, DepotSettings, ServiceContext,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    ctx: ServiceContext,
    references: Arc<dyn ReferenceData>,
    documents: Arc<dyn DocumentStore>,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        settings: DepotSettings,
        event_sender: EventSender,
        audit: Arc<dyn AuditSink>,
        references: Arc<dyn ReferenceData>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            ctx: ServiceContext::new(db_pool, settings, event_sender, audit),
            references,
            documents,
        }
    }

    pub fn state_machine(&self) -> RequestStateMachine {
        RequestStateMachine::new(self.ctx.clone())
    }

    pub fn gate(&self) -> GateOrchestrator {
        GateOrchestrator::new(self.state_machine())
    }

    pub fn requests(&self) -> RequestService {
        RequestService::new(
            self.state_machine(),
            self.references.clone(),
            self.documents.clone(),
        )
    }

    pub fn forklift(&self) -> ForkliftTaskCoordinator {
        ForkliftTaskCoordinator::new(self.state_machine())
    }

    pub fn repair(&self) -> RepairTicketCoordinator {
        RepairTicketCoordinator::new(self.state_machine())
    }

    pub fn seals(&self) -> SealAllocator {
        SealAllocator::new(self.ctx.clone())
    }

    pub fn invoicing(&self) -> InvoiceService {
        InvoiceService::new(self.ctx.clone())
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }
}

/// Every depot service, built once and shared.
#[derive(Clone)]
pub struct DepotServices {
    pub machine: RequestStateMachine,
    pub requests: Arc<RequestService>,
    pub gate: Arc<GateOrchestrator>,
    pub forklift: Arc<ForkliftTaskCoordinator>,
    pub repair: Arc<RepairTicketCoordinator>,
    pub seals: Arc<SealAllocator>,
    pub invoicing: Arc<InvoiceService>,
}

impl DepotServices {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            machine: factory.state_machine(),
            requests: Arc::new(factory.requests()),
            gate: Arc::new(factory.gate()),
            forklift: Arc::new(factory.forklift()),
            repair: Arc::new(factory.repair()),
            seals: Arc::new(factory.seals()),
            invoicing: Arc::new(factory.invoicing()),
        }
    }
}
