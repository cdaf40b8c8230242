//! Password-recovery mode shared across tabs.
//!
//! A tab that opens a reset link publishes a [`RecoveryRecord`]; every other
//! tab adopts it and stops treating sign-ins as normal sessions until the
//! record is cleared or passes its 30-minute timeout.

pub mod machine;
pub mod record;

pub use machine::{
    RecoveryInput, RecoveryState, RecoveryStateMachine, StoreEffect, Transition,
    TransitionContext,
};
pub use record::RecoveryRecord;
