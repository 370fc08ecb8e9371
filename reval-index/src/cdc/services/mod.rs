//! Per-source merge services.
//!
//! One service per source queue. Each owns the mapping from its source entity to the
//! master view fields that source contributes, resolves the target row through the
//! repository, and publishes refreshed views after every write. Failures are logged
//! with entity context and re-raised, the queue boundary decides redelivery.

use tracing::error;

use crate::types::MasterDoctorView;

pub mod connection_log;
pub mod profile;
pub mod recommendation;
pub mod trainee;

pub use connection_log::ConnectionLogService;
pub use profile::ProfileService;
pub use recommendation::RecommendationService;
pub use trainee::TraineeService;

/// Resolves a multi-match lookup to a single row.
///
/// Duplicate rows for one GMC number are a data-quality defect upstream; processing
/// continues with the first row in repository order so reruns stay deterministic.
fn first_match(
    mut views: Vec<MasterDoctorView>,
    gmc_reference_number: &str,
) -> Option<MasterDoctorView> {
    if views.len() > 1 {
        error!(
            gmc_reference_number,
            matches = views.len(),
            "multiple master view rows share one GMC number, continuing with the first"
        );
    }
    if views.is_empty() {
        None
    } else {
        Some(views.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with_id(id: &str) -> MasterDoctorView {
        let mut view = MasterDoctorView::new();
        view.id = id.to_owned();
        view
    }

    #[test]
    fn test_first_match_is_deterministic() {
        let views = vec![view_with_id("a"), view_with_id("b")];
        let picked = first_match(views, "7000001").unwrap();
        assert_eq!(picked.id, "a");

        assert!(first_match(Vec::new(), "7000001").is_none());
    }
}
