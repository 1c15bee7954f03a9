//! Container depot request lifecycle core.
//!
//! Service requests move containers through the gate, the yard, inspection
//! and billing. [`services::workflow::RequestStateMachine`] owns every status
//! change and fires the forklift, repair, seal and invoice side effects inside
//! the same storage transaction.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod collaborators;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use errors::ServiceError;
pub use services::{
    factory::{DepotServices, ServiceFactory},
    Actor, ActorScope, DepotSettings,
};
