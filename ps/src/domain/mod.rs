//! Domain types for the project state document
//!
//! - [`ProjectState`] - the persisted document
//! - [`Stage`] / [`Phase`] - the two workflow progressions

mod phase;
mod state;
pub(crate) mod lenient;
pub(crate) mod timestamp;

pub use phase::{Phase, STAGE2_COLLABORATION, Stage, current_phase, should_relax};
pub use state::{ProactivePrompts, ProjectState, ResearchDesign, SandwichStatus};
