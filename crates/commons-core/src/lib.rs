//! # Commons Core
//!
//! Core types and configuration shared by every Commons crate.
//!
//! The simulation models a tragedy of the commons: agents forage a scarce,
//! periodically regenerating resource on a square grid and may share energy
//! with needy neighbours or steal it from them. The types here describe the
//! pieces that every other crate agrees on:
//!
//! - **Grid geometry**: [`types::GridPos`] and the five-way [`types::Action`]
//! - **Strategies**: the closed [`types::Strategy`] set and the population
//!   compositions a run can be configured with
//! - **World parameters**: [`config::WorldConfig`] with the tuned defaults
//!
//! ## Quick Start
//!
//! ```rust
//! use commons_core::prelude::*;
//!
//! let config = WorldConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let pos = GridPos::new(3, 4);
//! assert_eq!(pos.step(Action::Up, config.grid_size), GridPos::new(3, 3));
//! ```

pub mod config;
pub mod error;
pub mod types;
pub mod prelude;
