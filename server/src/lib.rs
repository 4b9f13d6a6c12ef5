//! # Classroom Session Server
//!
//! This library provides the coordination server for live classroom
//! sessions. It manages the canonical room state, processes events from
//! student and teacher connections, and broadcasts updates so every
//! participant in a room sees the same session.
//!
//! ## Core Responsibilities
//!
//! ### Room Authority
//! All room state lives on the server: the student roster, registered
//! words and slider values, the active quiz and its answers, and the
//! race configuration. Clients send intents and receive the resulting
//! state; they never mutate shared state directly.
//!
//! ### Connection Lifecycle
//! Handles the complete lifecycle of WebSocket connections including:
//! - Role binding (student join, teacher dashboard with password)
//! - Event processing with per-room serialization
//! - Disconnection cleanup and empty-room garbage collection
//!
//! ### Race Simulation
//! A room's gradient-descent race runs on a dedicated per-room tick
//! loop at roughly 30Hz. Each tick advances every ball on the shared
//! loss surface and broadcasts a snapshot, until all balls converge or
//! escape.
//!
//! ## Module Organization
//!
//! - [`rooms`]: the room store, per-room state and garbage collection
//! - [`session`]: per-connection protocol handling and authorization
//! - [`race`]: ball physics, team registry and tick semantics
//! - [`scheduler`]: the cancellable per-room tick loop
//! - [`quiz`]: live quiz state and result aggregation
//! - [`broadcast`]: fan-out helpers over per-connection channels
//! - [`http`]: the axum WebSocket and REST surface
//!
//! ## Concurrency Model
//!
//! The room map is guarded by an outer read-write lock used only for
//! lookup and insertion; each room has its own async mutex, so events
//! for different rooms are handled in parallel while events for one
//! room are serialized. Broadcasts happen while the room lock is held,
//! which keeps the event order every receiver observes identical.

pub mod broadcast;
pub mod http;
pub mod quiz;
pub mod race;
pub mod rooms;
pub mod scheduler;
pub mod session;
pub mod utils;
