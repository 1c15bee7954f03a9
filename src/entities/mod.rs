pub mod forklift_task;
pub mod invoice;
pub mod invoice_line_item;
pub mod repair_cost_item;
pub mod repair_ticket;
pub mod request_transition;
pub mod seal;
pub mod seal_usage_history;
pub mod service_request;
pub mod yard_placement;
pub mod yard_slot;
