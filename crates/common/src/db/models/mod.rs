//! Row models for the org tables of the shared dataset

mod org_api_key;
mod org_profile;
mod org_subscription;

pub use org_api_key::ApiKeyRecord;
pub use org_profile::OrgProfile;
pub use org_subscription::OrgSubscription;
