//! Terminal front-end for the reconciliation engine
//!
//! The `declarative` engine does the work; this module:
//! 1. Displays the plan - what each subsystem would change
//! 2. Confirms with the user
//! 3. Reconciles with a progress bar and prints the report

pub mod differ;
pub mod executor;

pub use executor::{
    ExecuteOptions, confirm_proceed, execute, print_report, print_rollback, print_validation_errors,
};
