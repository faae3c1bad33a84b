//! Common code shared between the `roadwatch` pipeline and fix producers.
pub mod protocol;
