pub mod chat;
pub mod ecos_sessions;
pub mod evaluation;
pub mod handoff;
pub mod middleware;
pub mod router;
pub mod scenarios;
pub mod simulator;
pub mod state;
pub mod student;
pub mod sweep;
pub mod training;

// Re-export what the binaries need to assemble the server.
pub use router::{build_router, ApiDoc};
pub use sweep::run_expiry_sweep;
