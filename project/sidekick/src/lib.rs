pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod membership;
pub mod poll;
pub mod reconcile;
pub mod target;

pub use config::{Config, IdentityPolicy};
pub use discovery::{KubeDiscovery, PodDiscovery};
pub use membership::{ConsulClient, Membership};
pub use poll::{PollLoop, Sidekick};
pub use reconcile::{ConvergencePlan, DesiredSet, ReconcileReport, Reconciler};
pub use target::{Target, resolve_target};
