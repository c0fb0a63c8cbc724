//! # GPhL workflow orchestrator
//!
//! A message-driven protocol engine mediating between a beamline
//! control system and the external GPhL crystallographic-strategy
//! process. Inbound engine messages are pulled off an ordered channel
//! and routed to typed handlers that drive beamline actions (sample
//! centring, detector and energy presets, data-collection execution,
//! lattice-selection requests) and produce structured replies.
//!
//! ## Core concepts
//!
//! - **Messages**: the closed ABI taxonomy in [`messages`], tagged with
//!   opaque correlation ids
//! - **Channel**: an unbounded FIFO with an end-of-stream sentinel
//!   ([`channel`])
//! - **Orchestrator**: the dispatch loop and run lifecycle
//!   ([`orchestrator`]), owner of all per-run mutable state
//! - **Collaborators**: the beamline queue, hardware and engine
//!   connection behind the traits in [`beamline`]
//! - **Events**: operator-facing stream with pluggable sinks
//!   ([`events`])
//!
//! ## Concurrency model
//!
//! Single-task cooperative dispatch: messages are handled strictly in
//! arrival order, and long external calls (solver subprocess, queue
//! execution, operator input) are `.await` suspension points. The
//! orchestrator's state is never mutated concurrently.
//!
//! ## Module guide
//!
//! - [`messages`] - ABI message and reply types
//! - [`channel`] - inbound message queue and sentinel semantics
//! - [`state`] - workflow state machine
//! - [`orchestrator`] - dispatch loop, handlers, run lifecycle
//! - [`strategy`] - geometric-strategy handling and operator queries
//! - [`collection`] - collection-proposal execution
//! - [`centring`] - sample-centring coordination
//! - [`recentring`] - translation prediction via the external solver
//! - [`indexing`] - indexing-solution table parsing
//! - [`beamline`] - collaborator interfaces
//! - [`ui`] - blocking operator parameter requests
//! - [`config`] - file paths, axis roles and defaults
//! - [`nml`] - Fortran-namelist subset used by calibration files
//! - [`events`] - event bus and sinks
//! - [`telemetry`] - tracing initialisation

pub mod beamline;
pub mod centring;
pub mod channel;
pub mod collection;
pub mod config;
pub mod events;
pub mod indexing;
pub mod messages;
pub mod model;
pub mod nml;
pub mod orchestrator;
pub mod recentring;
pub mod state;
pub mod strategy;
pub mod telemetry;
pub mod ui;
