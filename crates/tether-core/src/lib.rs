//! Tether Core Primitives
//!
//! This crate provides the execution-context building blocks of the Tether
//! RPC engine:
//! - **Lifetime**: "alive until terminated" scopes (`lifetime` module)
//! - **Scheduler**: the capability contract for where work runs, the pump
//!   extension for waiting-while-draining, and the inline scheduler
//!   (`scheduler` module)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod lifetime;
pub mod scheduler;

pub use lifetime::Lifetime;
pub use scheduler::{
    InlineScheduler, Job, PumpScheduler, PumpTimeout, Scheduler, SchedulerExt,
};

/// Best-effort extraction of a panic payload's message for logging.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
