//! Response plumbing shared by all routes: problem responses, success
//! envelopes and the session request guard.

pub mod envelope;
pub mod problem;
pub mod session;
