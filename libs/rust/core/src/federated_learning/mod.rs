//! Secure aggregation for federated learning rounds.

pub mod buffer;
pub mod coordinator;
pub mod lifecycle;
pub mod model;
pub mod schema;

pub type RoundId = u64;

pub use buffer::{ClientId, Contribution, ContributionBuffer};
pub use coordinator::{Accepted, AggregateResult, AggregationCoordinator, AppliedRound, RoundState, RoundStatus};
pub use lifecycle::{RoundController, RoundSummary};
pub use model::{GlobalModelStore, InMemoryModel, ModelSnapshot, ModelVersion, Tensor};
pub use schema::ParameterSchema;
