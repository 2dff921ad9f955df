//! API routes and handlers.

pub mod voice;
mod router;

pub use router::create_router;
