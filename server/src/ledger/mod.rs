mod persisted_state;
mod records;
mod store;

pub use persisted_state::{PersistedState, Stats};
pub use records::{DecisionEntry, OutcomeRecord, OutcomeStatus, SendRecord, TokenEvent};
pub use store::{LedgerError, OutcomeLedger};
