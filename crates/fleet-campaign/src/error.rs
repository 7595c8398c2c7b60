//! Campaign engine error taxonomy.

use thiserror::Error;
use fleet_proto::CampaignId;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("persistence error: {0}")]
    Persist(#[from] fleet_persist::PersistError),

    /// A transition was attempted from a campaign already in a terminal
    /// state, or from a state other than the one the caller expected.
    #[error("campaign {0} rejected transition: not in expected state")]
    InvalidTransition(CampaignId),

    #[error("campaign {0} cancelled during execution")]
    Cancelled(CampaignId),
}

pub type CampaignResult<T> = Result<T, CampaignError>;
