mod common;

use assert_matches::assert_matches;
use common::TestDepot;
use container_depot::{
    entities::{
        forklift_task::{self, TaskStatus},
        service_request::RequestStatus,
        yard_placement::{self, PlacementStatus},
    },
    events::Event,
    services::{forklift::AssignTaskInput, workflow::TransitionExtra},
    ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, SqlErr};
use uuid::Uuid;

const CONTAINER: &str = "CSQU3054383";

fn manual(container_no: &str) -> AssignTaskInput {
    AssignTaskInput {
        container_no: container_no.to_string(),
        request_id: None,
        from_slot_id: None,
        to_slot_id: None,
        driver: None,
    }
}

#[tokio::test]
async fn concurrent_export_triggers_leave_one_open_task() {
    let depot = TestDepot::new().await;
    depot.place(CONTAINER, "A", PlacementStatus::Hold).await;
    let request = depot.create_export(CONTAINER).await;
    depot.through_gate(request.id).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let forklift = depot.services.forklift.clone();
        let actor = depot.clerk();
        handles.push(tokio::spawn(async move {
            forklift.ensure_export_task(request.id, &actor).await
        }));
    }
    for handle in handles {
        let created = handle.await.unwrap().unwrap();
        assert!(created.is_none());
    }

    let open = forklift_task::Entity::find()
        .filter(forklift_task::Column::ContainerNo.eq(CONTAINER))
        .filter(forklift_task::Column::Status.is_in(TaskStatus::open_statuses()))
        .all(depot.db.as_ref())
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn export_trigger_skips_containers_not_in_the_yard() {
    let depot = TestDepot::new().await;
    let request = depot.create_export(CONTAINER).await;
    let request = depot.through_gate(request.id).await;

    assert_eq!(request.status, RequestStatus::GateIn);
    assert!(depot
        .services
        .forklift
        .list_open_tasks(CONTAINER)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn manual_assign_conflicts_with_an_open_task() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let (slot, _) = depot.place(CONTAINER, "A", PlacementStatus::Occupied).await;

    let task = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.from_slot_id, Some(slot.id));

    let err = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    // A closed task frees the container again.
    depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::Cancelled, None, &actor)
        .await
        .unwrap();
    depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();
}

#[tokio::test]
async fn driver_on_assign_marks_task_assigned() {
    let depot = TestDepot::new().await;
    let mut input = manual(CONTAINER);
    input.driver = Some("forklift-2".to_string());
    let task = depot
        .services
        .forklift
        .assign_task(input, &depot.clerk())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_driver.as_deref(), Some("forklift-2"));
}

#[tokio::test]
async fn assign_rejects_a_request_for_another_container() {
    let depot = TestDepot::new().await;
    let request = depot.create_import(CONTAINER).await;
    let mut input = manual("TGHU7654321");
    input.request_id = Some(request.id);

    let err = depot
        .services
        .forklift
        .assign_task(input, &depot.clerk())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cancel_without_reason_records_placeholder() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let task = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();

    let cancelled = depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::Cancelled, Some("   ".to_string()), &actor)
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("N/A"));
}

#[tokio::test]
async fn cancel_keeps_given_reason() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let task = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();

    let cancelled = depot
        .services
        .forklift
        .update_status(
            task.id,
            TaskStatus::Cancelled,
            Some("truck left".to_string()),
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("truck left"));
}

#[tokio::test]
async fn delete_requires_cancelled_task() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let task = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();

    let err = depot
        .services
        .forklift
        .delete_task(task.id, &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::Cancelled, None, &actor)
        .await
        .unwrap();
    depot
        .services
        .forklift
        .delete_task(task.id, &actor)
        .await
        .unwrap();

    let err = depot.services.forklift.get_task(task.id).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    let events = depot.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ForkliftTaskDeleted(id) if *id == task.id)));
}

#[tokio::test]
async fn terminal_task_statuses_are_final() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let task = depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &actor)
        .await
        .unwrap();
    let forklift = &depot.services.forklift;
    forklift
        .update_status(task.id, TaskStatus::InProgress, None, &actor)
        .await
        .unwrap();
    forklift
        .update_status(task.id, TaskStatus::Completed, None, &actor)
        .await
        .unwrap();

    let err = forklift
        .update_status(task.id, TaskStatus::InProgress, None, &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });
    assert_eq!(
        forklift.get_task(task.id).await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn export_lift_can_pass_through_approval() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let (_, placement) = depot.place(CONTAINER, "A", PlacementStatus::Hold).await;
    let request = depot.create_export(CONTAINER).await;
    depot.through_gate(request.id).await;
    let task = depot.services.forklift.list_open_tasks(CONTAINER).await.unwrap()[0].clone();

    let forklift = &depot.services.forklift;
    forklift
        .update_status(task.id, TaskStatus::Assigned, None, &actor)
        .await
        .unwrap();
    forklift
        .update_status(task.id, TaskStatus::InProgress, None, &actor)
        .await
        .unwrap();
    forklift
        .update_status(task.id, TaskStatus::PendingApproval, None, &actor)
        .await
        .unwrap();
    let request_now = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert_eq!(request_now.status, RequestStatus::Forklifting);

    forklift
        .update_status(task.id, TaskStatus::Completed, None, &actor)
        .await
        .unwrap();
    let request_now = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert_eq!(request_now.status, RequestStatus::DoneLifting);

    let placement = yard_placement::Entity::find_by_id(placement.id)
        .one(depot.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(placement.status, PlacementStatus::Removed);
}

#[tokio::test]
async fn cancelled_task_leaves_request_alone() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    depot.place(CONTAINER, "A", PlacementStatus::Hold).await;
    let request = depot.create_export(CONTAINER).await;
    depot.through_gate(request.id).await;
    let task = depot.services.forklift.list_open_tasks(CONTAINER).await.unwrap()[0].clone();

    depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::Cancelled, None, &actor)
        .await
        .unwrap();
    let request_now = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert_eq!(request_now.status, RequestStatus::GateIn);

    // Re-running the trigger opens a fresh task now that the old one is closed.
    let again = depot
        .services
        .forklift
        .ensure_export_task(request.id, &actor)
        .await
        .unwrap();
    assert!(again.is_some());
}

#[tokio::test]
async fn manual_assign_positions_a_checked_import() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let request = depot.create_import(CONTAINER).await;
    depot.through_gate(request.id).await;
    depot
        .services
        .machine
        .transition(request.id, RequestStatus::Checked, &actor, TransitionExtra::default())
        .await
        .unwrap();

    let slot = depot.empty_slot("D").await;
    let mut input = manual(CONTAINER);
    input.request_id = Some(request.id);
    input.to_slot_id = Some(slot.id);
    depot
        .services
        .forklift
        .assign_task(input, &actor)
        .await
        .unwrap();

    let request_now = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert_eq!(request_now.status, RequestStatus::Positioned);
}

#[tokio::test]
async fn import_completion_without_destination_rolls_back() {
    let depot = TestDepot::new().await;
    let actor = depot.clerk();
    let request = depot.create_import(CONTAINER).await;
    depot.through_gate(request.id).await;
    depot
        .services
        .machine
        .transition(request.id, RequestStatus::Checked, &actor, TransitionExtra::default())
        .await
        .unwrap();

    let mut input = manual(CONTAINER);
    input.request_id = Some(request.id);
    let task = depot
        .services
        .forklift
        .assign_task(input, &actor)
        .await
        .unwrap();
    depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::InProgress, None, &actor)
        .await
        .unwrap();

    let err = depot
        .services
        .forklift
        .update_status(task.id, TaskStatus::Completed, None, &actor)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    assert_eq!(
        depot.services.forklift.get_task(task.id).await.unwrap().status,
        TaskStatus::InProgress
    );
    let request_now = depot.services.requests.get_request(request.id, &actor).await.unwrap();
    assert_eq!(request_now.status, RequestStatus::Forklifting);
    let placements = yard_placement::Entity::find()
        .filter(yard_placement::Column::ContainerNo.eq(CONTAINER))
        .all(depot.db.as_ref())
        .await
        .unwrap();
    assert!(placements.is_empty());
}

fn raw_task(container_no: &str, status: TaskStatus) -> forklift_task::ActiveModel {
    let now = Utc::now();
    forklift_task::ActiveModel {
        id: Set(Uuid::new_v4()),
        container_no: Set(container_no.to_string()),
        request_id: Set(None),
        from_slot_id: Set(None),
        to_slot_id: Set(None),
        status: Set(status),
        assigned_driver: Set(None),
        cancel_reason: Set(None),
        created_by: Set("loader".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[tokio::test]
async fn storage_refuses_a_second_open_task() {
    let depot = TestDepot::new().await;
    depot
        .services
        .forklift
        .assign_task(manual(CONTAINER), &depot.clerk())
        .await
        .unwrap();

    // Writers that skip the coordinator's check still hit the index.
    let err = raw_task(CONTAINER, TaskStatus::Assigned)
        .insert(depot.db.as_ref())
        .await
        .unwrap_err();
    assert_matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)));

    // Closed tasks are not constrained.
    raw_task(CONTAINER, TaskStatus::Cancelled)
        .insert(depot.db.as_ref())
        .await
        .unwrap();
    raw_task(CONTAINER, TaskStatus::Completed)
        .insert(depot.db.as_ref())
        .await
        .unwrap();
}

#[tokio::test]
async fn assign_checks_the_container_number_shape() {
    let depot = TestDepot::new().await;
    let err = depot
        .services
        .forklift
        .assign_task(manual("CSQU30543"), &depot.clerk())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
