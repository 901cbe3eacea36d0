//! Seams to the dispatcher's two external collaborators.
//!
//! The queue backend and the worker service are opaque services with a
//! narrow interface: the backend streams fetched items followed by a
//! completion, the worker service accepts a dispatch and emits
//! progress/error/close signals. Concrete transports live with the
//! embedding application; the engine only sees these traits.

pub mod coordinate;
pub mod queue;
pub mod worker;

pub use coordinate::Coordinate;
pub use queue::{BackendError, FetchEvent, FetchReply, FetchRequest, QueueBackend};
pub use worker::{Dispatch, QueueItem, SubmitError, WorkerService, WorkerSignal};
