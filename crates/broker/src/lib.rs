//! Durable execution broker for notebook-style interpreter kernels.
//!
//! # Purpose
//!
//! The broker is a background daemon that accepts code fragments from
//! editor clients, runs them against a per-notebook interpreter
//! subprocess ("kernel"), and streams output back — while guaranteeing
//! that a submitted execution either completes, fails, or is recovered
//! after a crash, with bounded memory and no client able to stall
//! another.
//!
//! # Mental model
//!
//! The broker is a collection of isolated actor services, each owning a
//! private piece of state and driven by its own `mpsc`-fed command loop,
//! orchestrated by a single [`Broker`](runtime::Broker). Callers never
//! reach into another service's state directly; they hold a small
//! `Clone`-able handle with one async method per operation.
//!
//! # Key types
//!
//! | Type | Role |
//! | --- | --- |
//! | [`Broker`](runtime::Broker) | Orchestrator that wires and owns every service handle. |
//! | [`StoreHandle`](store::StoreHandle) | Durable journal of executions and asset leases. |
//! | [`SupervisorHandle`](services::supervisor::SupervisorHandle) | Owner of kernel subprocess lifecycles. |
//! | [`MultiplexerHandle`](services::multiplexer::MultiplexerHandle) | Demuxer of kernel output into per-execution records. |
//! | [`SchedulerHandle`](services::scheduler::SchedulerHandle) | Per-kernel FIFO dispatch and timeout enforcement. |
//! | [`HubHandle`](services::hub::HubHandle) | Concurrent, non-blocking fan-out to subscribed clients. |
//! | [`GcHandle`](services::gc::GcHandle) | Lease-based asset garbage collection. |
//!
//! # Invariants
//!
//! - Monotonic status: an execution's status only ever moves forward
//!   along `Pending -> Running -> {Completed, Failed, Cancelled, Timeout}`.
//!   - Enforced in: `store::StoreService::apply_transition`
//!   - Tested by: `tests::duplicate_task_id`, `tests::crash_recovery`
//!   - Failure symptom: a client observes a terminal execution "restart".
//!
//! - Durable-before-dispatch: an execution is committed to the store
//!   before it is ever handed to a kernel.
//!   - Enforced in: `services::scheduler::SchedulerService::handle_submit`
//!   - Tested by: `tests::crash_recovery`
//!   - Failure symptom: a crash between dispatch and persistence silently loses work.
//!
//! - Orphan safety: output that arrives before its parent execution is
//!   bound is retained, newest-first-capped, in a per-kernel-message ring.
//!   - Enforced in: `services::multiplexer::MultiplexerService::handle_frame`
//!   - Tested by: `tests::orphan_overflow`
//!   - Failure symptom: early output is silently lost once the execution is registered.
//!
//! - No head-of-line blocking: one slow subscriber's delivery latency
//!   never affects another subscriber's.
//!   - Enforced in: `services::hub::HubService::handle_broadcast`
//!   - Tested by: `tests::slow_subscriber`
//!   - Failure symptom: all clients stall behind the slowest one.
//!
//! - Lease safety: an asset with an unexpired lease, or present in a
//!   client's referenced set, is never deleted.
//!   - Enforced in: `services::gc::GcService::handle_prune`
//!   - Tested by: `tests::lease_gc_race`
//!   - Failure symptom: a client-visible image/table vanishes from disk.
//!
//! # Data flow
//!
//! 1. Client -> Broker (IPC): a request is decoded by the `transport` module and dispatched into [`Broker`].
//! 2. Broker -> Store: the execution is durably enqueued before any side effect on a kernel.
//! 3. Broker -> Supervisor: the kernel is started (if needed) and the request framed and written to its stdio.
//! 4. Kernel -> Multiplexer: output frames are read from the kernel and routed to the owning execution.
//! 5. Multiplexer -> Hub: every routed (and orphaned-then-bound) frame is also broadcast to subscribers.
//! 6. Multiplexer -> Scheduler: a terminal frame signals the execution's completion event exactly once.
//!
//! # Lifecycle
//!
//! - Startup: [`Broker::new`](runtime::Broker::new) starts services in a tiered sequence to resolve
//!   circular handle dependencies, then [`Broker::restore`](runtime::Broker::restore) re-dispatches
//!   every non-terminal row found in the store.
//! - Submission: `submit_execution` is legal even before any kernel exists for a notebook; the first
//!   submission implicitly starts one.
//! - Shutdown: [`Broker::shutdown`](runtime::Broker::shutdown) stops new submissions, drains pending
//!   work to `Cancelled`, tears down every kernel, then stops the store.
//!
//! # Concurrency & ordering
//!
//! Each service is a single-threaded actor; concurrency comes from running
//! several actors in parallel tasks. Ordering within one service's channel
//! is strictly FIFO. Cross-service ordering is eventually consistent.
//!
//! # Failure modes & recovery
//!
//! - Kernel death: the supervisor's reaper declares the kernel dead, every
//!   in-flight execution for that notebook becomes `Failed`, and the next
//!   submission transparently respawns the kernel.
//! - Hub send failure: the failing connection is unregistered; no other
//!   subscriber is affected.
//! - Store write failure: fatal for the submission in flight; surfaced as
//!   `StorageFailure` to the caller, who must not acknowledge the client.
//!
//! # Recipes
//!
//! - Adding a new client operation: extend `cellbroker-proto`'s `RequestPayload`,
//!   then add a branch in `transport::dispatch` and the relevant service handle.
//! - Changing dispatch timing: adjust [`SchedulerService`](services::scheduler::SchedulerService)
//!   and keep the durable-before-dispatch invariant intact.

pub mod config;
pub mod error;
pub mod framing;
pub mod kernel_protocol;
pub mod launcher;
pub mod runtime;
pub mod services;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::BrokerError;
pub use runtime::Broker;
