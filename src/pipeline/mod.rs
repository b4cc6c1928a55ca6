//! Pipeline Coordinator (C10): owns C1–C9 and exposes the append-mic /
//! append-speaker / finalize / dispose contract.

pub mod messages;
pub mod session;
