pub mod evaluator;
pub mod ip_list;
pub mod outage;
pub mod policy;
pub mod settings;

pub use evaluator::{evaluate, Evaluation, OutageState};
pub use ip_list::AllowList;
pub use outage::{Outage, OutageDraft, OutageError};
pub use policy::{Caller, Check, Checks, Gate, GateDecision, GateError, GatePolicy};
pub use settings::OutageSettings;
