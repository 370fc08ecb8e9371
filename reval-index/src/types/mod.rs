//! Core data types: the master view, the source entity shapes and the CDC event
//! envelope.

pub mod entity;
pub mod event;
pub mod view;

pub use entity::{ConnectionAuditLog, DoctorProfile, Recommendation, TraineeUpdate};
pub use event::{CdcEvent, CdcOperation, UpdateDescription};
pub use view::{MasterDoctorView, RecommendationStatus, UnderNotice, is_reliable_gmc_number};
