pub mod dispatch;
pub mod executable;
pub mod grants;
pub mod graph_actions;
pub mod pid_store;
pub mod registry;
pub mod runner;
mod schema;
pub mod supervisor;

pub use dispatch::{ActionDispatcher, ActionInvocation};
pub use grants::GrantTable;
pub use pid_store::{PidStore, RunnerHandle};
pub use registry::{ActionRegistry, RegisteredAction};
pub use runner::{ActionRunner, RunReport, RunnerState};
pub use supervisor::{RunnerSupervisor, RunningExecution, StopOutcome, SupervisorStats};
