//! The change-event ingestion and merge engine.

pub mod fields;
pub mod router;
pub mod services;

pub use router::{route_event, CdcHandler};
pub use services::{ConnectionLogService, ProfileService, RecommendationService, TraineeService};
