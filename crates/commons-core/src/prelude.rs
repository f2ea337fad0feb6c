//! Commons Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use commons_core::prelude::*;
//! ```

pub use crate::types::{
    Action, AgentId, GridPos, PopulationStrategy, Strategy, Tick, ACTION_COUNT,
};

pub use crate::config::WorldConfig;

pub use crate::error::{CommonsError, Result};
