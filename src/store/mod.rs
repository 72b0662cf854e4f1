/// Observation and incident storage
pub mod incidents;
pub mod journal;
pub mod observations;

pub use incidents::IncidentStore;
pub use journal::Journal;
pub use observations::{
    ObservationFilter, ObservationQuery, ObservationStats, ObservationStore, Page, SortField,
    SortOrder, StatusFilter,
};
