//! The ingress gateway (C7): the only HTTP surface a client ever talks to.
//! Accepts submissions, publishes the seed envelope, and proxies reads of
//! pipeline state back from the in-process orchestrator. Never touches the
//! broker for anything but publishing `tasks.analysis` and
//! `orchestration.events`.

pub mod error;
pub mod ingest;
pub mod router;
pub mod routes;
pub mod state;

pub use router::build_router;
pub use state::AppState;
