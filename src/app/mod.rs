//! Application layer: flow scheduling and per-account execution.

pub mod agent;
pub mod flow;
pub mod harvester;
pub mod schedule;

pub use agent::{AccountAgent, AgentConfig};
pub use flow::{FlowKind, FlowRegistry, FlowState, FollowUp, Job};
pub use harvester::{Harvester, spawn_harvester};
pub use schedule::RetryPolicy;
