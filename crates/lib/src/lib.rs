//! weft-lib: incremental multi-target build orchestration.
//!
//! - [`rules`]: targets and modules declared in `weft.toml`
//! - [`resolve`]: expands targets into validated build jobs
//! - [`toolchain`]: turns jobs into tasks
//! - [`graph`]: schedules tasks with a fingerprint cache
//! - [`orchestrate`]: runs a whole build with per-target hooks

pub mod consts;
pub mod graph;
pub mod lock;
pub mod model;
pub mod orchestrate;
pub mod platform;
pub mod resolve;
pub mod rules;
pub mod toolchain;
pub mod util;
