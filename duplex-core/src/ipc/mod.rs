//! Types that cross a boundary: hub events seen by embedders, and the
//! request/response messages exchanged with engine workers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON unchanged.

pub mod events;
pub mod protocol;
