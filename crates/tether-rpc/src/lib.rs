//! Tether RPC Engine
//!
//! The scheduling and reentrant-wait machinery that lets a synchronous,
//! blocking remote call sit on top of a queue-driven message dispatcher
//! without deadlocking:
//! - **Dispatcher**: a shared FIFO work queue with one dedicated worker loop
//!   and a pump-while-waiting primitive (`dispatcher` module)
//! - **Pending calls**: resolve-once result cells for calls in flight
//!   (`task` module)
//! - **Sync bridge**: blocking nested calls that pump the protocol
//!   scheduler until the result lands (`sync_call` module)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod dispatcher;
pub mod sync_call;
pub mod task;

pub use dispatcher::{DispatcherError, QueueDispatcher};
pub use sync_call::{sync_call, RpcCall, RpcError, RpcTimeouts};
pub use task::{CallFault, CallOutcome, PendingCall};
