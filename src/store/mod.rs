//! Filesystem-backed job registry.
//!
//! - [`JobId`]: validated identifier shared by the scheduler and the folder layout
//! - [`JobIndex`]: typed access to `<root>/<id>/` folders and `<root>/<id>.zip` archives

pub mod index;
pub mod job_id;

pub use index::JobIndex;
pub use job_id::JobId;
