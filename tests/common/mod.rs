#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use container_depot::{
    collaborators::{EventAuditSink, InMemoryDocumentStore, InMemoryReferenceData},
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        service_request,
        yard_placement::{self, PlacementStatus},
        yard_slot,
    },
    events::{self, Event, EventHandler, EventSender},
    services::{
        requests::{CreateRequestInput, ExportRequestInput, ImportRequestInput},
        workflow::DriverInfo,
    },
    Actor, DepotServices, DepotSettings, ServiceFactory,
};
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Collects every event drained by the consumer task.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// One isolated depot backed by an in-memory SQLite database.
pub struct TestDepot {
    pub services: DepotServices,
    pub factory: ServiceFactory,
    pub db: Arc<DbPool>,
    pub references: Arc<InMemoryReferenceData>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub recorder: Arc<Recorder>,
    pub customer_id: Uuid,
    pub shipping_line_id: Uuid,
    pub container_type_id: Uuid,
    _consumer: tokio::task::JoinHandle<()>,
}

impl TestDepot {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // One connection: the in-memory database lives on it and writers queue for it.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to migrate test database");
        let db = Arc::new(pool);

        let (sender, rx) = EventSender::channel(4096);
        let recorder = Arc::new(Recorder::default());
        let consumer = tokio::spawn(events::process_events(
            rx,
            vec![recorder.clone() as Arc<dyn EventHandler>],
        ));

        let references = Arc::new(InMemoryReferenceData::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let customer_id = Uuid::new_v4();
        let shipping_line_id = Uuid::new_v4();
        let container_type_id = Uuid::new_v4();
        references.add_customer(customer_id);
        references.add_shipping_line(shipping_line_id);
        references.add_container_type(container_type_id);

        let factory = ServiceFactory::new(
            db.clone(),
            DepotSettings::from(&cfg),
            sender.clone(),
            Arc::new(EventAuditSink::new(sender)),
            references.clone(),
            documents.clone(),
        );
        let services = DepotServices::new(&factory);

        Self {
            services,
            factory,
            db,
            references,
            documents,
            recorder,
            customer_id,
            shipping_line_id,
            container_type_id,
            _consumer: consumer,
        }
    }

    pub fn clerk(&self) -> Actor {
        Actor::depot("clerk-1")
    }

    pub fn customer(&self) -> Actor {
        Actor::customer("portal-user", self.customer_id)
    }

    pub fn import_input(&self, container_no: &str, walk_in: bool) -> CreateRequestInput {
        CreateRequestInput::Import(ImportRequestInput {
            container_no: container_no.to_string(),
            customer_id: self.customer_id,
            shipping_line_id: self.shipping_line_id,
            container_type_id: self.container_type_id,
            booking_no: None,
            walk_in,
        })
    }

    pub fn export_input(&self, container_no: Option<&str>) -> CreateRequestInput {
        CreateRequestInput::Export(ExportRequestInput {
            container_no: container_no.map(str::to_string),
            customer_id: self.customer_id,
            shipping_line_id: self.shipping_line_id,
            container_type_id: self.container_type_id,
            booking_no: "BK-0001".to_string(),
        })
    }

    pub async fn create_import(&self, container_no: &str) -> service_request::Model {
        self.services
            .requests
            .create_request(self.import_input(container_no, false), &self.clerk())
            .await
            .expect("create import request")
    }

    pub async fn create_export(&self, container_no: &str) -> service_request::Model {
        let request = self
            .services
            .requests
            .create_request(self.export_input(None), &self.clerk())
            .await
            .expect("create export request");
        self.services
            .requests
            .pick_container(request.id, container_no, &self.clerk())
            .await
            .expect("pick container")
    }

    /// Schedules and forwards a request, leaving it at `FORWARDED`.
    pub async fn forward(&self, request_id: Uuid) -> service_request::Model {
        let actor = self.clerk();
        self.services
            .gate
            .schedule(request_id, appointment(), &actor)
            .await
            .expect("schedule");
        self.services
            .gate
            .forward(request_id, &actor)
            .await
            .expect("forward")
    }

    /// Drives a fresh request of either flow through the gate.
    pub async fn through_gate(&self, request_id: Uuid) -> service_request::Model {
        self.forward(request_id).await;
        self.services
            .gate
            .accept_gate(request_id, driver(), &self.clerk())
            .await
            .expect("accept at gate")
    }

    /// Puts a container in a yard slot with the given placement status.
    pub async fn place(
        &self,
        container_no: &str,
        block: &str,
        status: PlacementStatus,
    ) -> (yard_slot::Model, yard_placement::Model) {
        let now = Utc::now();
        let slot = yard_slot::ActiveModel {
            id: Set(Uuid::new_v4()),
            yard: Set("Y1".to_string()),
            block: Set(block.to_string()),
            slot: Set(unique_slot()),
            is_reserved: Set(false),
            created_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert slot");
        let placement = yard_placement::ActiveModel {
            id: Set(Uuid::new_v4()),
            container_no: Set(container_no.to_string()),
            slot_id: Set(slot.id),
            status: Set(status),
            placed_at: Set(now),
            removed_at: Set(None),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert placement");
        (slot, placement)
    }

    pub async fn empty_slot(&self, block: &str) -> yard_slot::Model {
        yard_slot::ActiveModel {
            id: Set(Uuid::new_v4()),
            yard: Set("Y1".to_string()),
            block: Set(block.to_string()),
            slot: Set(unique_slot()),
            is_reserved: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert slot")
    }

    /// Waits for the consumer to drain, then returns the events seen so far.
    pub async fn events(&self) -> Vec<Event> {
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let seen = self.recorder.events.lock().await;
            if !seen.is_empty() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.recorder.events.lock().await.clone()
    }
}

fn unique_slot() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

pub fn appointment() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 15, 9, 30, 0).unwrap()
}

pub fn driver() -> DriverInfo {
    DriverInfo {
        name: "Tran Van A".to_string(),
        truck_plate: "51C-123.45".to_string(),
        phone: Some("0901234567".to_string()),
    }
}
