//! Domain records shared by the store, services and both surfaces.

pub mod collection;
pub mod disease;
pub mod organization;
pub mod search_config;
pub mod stats;
pub mod validation;

pub use collection::{ManualEntry, OrganizationCollection};
pub use disease::DiseaseInfo;
pub use organization::{
    Organization, OrganizationType, Source, TokenUsage, WebsiteAvailabilityRecord,
};
pub use search_config::{SearchConfig, SearchTerm};
pub use stats::DiseaseSearchStats;
pub use validation::ValidationStatus;
