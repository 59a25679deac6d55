//! 协商（争议）与结算台账

pub mod ledger;

pub use ledger::DisputeLedger;
