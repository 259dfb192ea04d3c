//! PhaseStore - persistent workflow state for staged qualitative coding
//!
//! Keeps one JSON document per project on disk, safe against concurrent
//! script invocations and crashes mid-write, and derives the methodological
//! rule state machine from it: which isolation rules are active, when they
//! relax, when repeated overrides mean a rule no longer fits, and how close
//! the coding is to saturation.
//!
//! # Architecture
//!
//! ```text
//! <project>/.interpretive-orchestration/
//! ├── config.json              # ProjectState document (atomic rename on save)
//! ├── conversation-log.jsonl   # structured event log, append-only
//! ├── conversation-log.md      # narrative view of the same events
//! ├── friction-log.jsonl       # fired friction triggers and bypasses
//! └── reasoning/
//!     ├── batch_20250101_120000000_00000005_<uuid>.jsonl
//!     └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use phasestore::{Config, Project};
//!
//! let config = Config::load(None, project_root)?;
//! let project = Project::open(project_root, config);
//! let outcome = project.record_override("case-isolation", Some("cross-case theme"))?;
//! if outcome.first_time_strained {
//!     println!("{}", outcome.strain_prompt.unwrap_or_default());
//! }
//! ```

pub mod branches;
pub mod buffer;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod friction;
pub mod lock;
pub mod presets;
pub mod project;
pub mod rules;
pub mod saturation;
pub mod store;
pub mod strain;
pub mod team;

pub use branches::{BranchFraming, BranchStatus, WorkspaceBranches};
pub use buffer::{BufferedRecord, WriteBuffer};
pub use config::Config;
pub use domain::{Phase, ProjectState, Stage, current_phase, should_relax};
pub use error::{BranchError, FrictionError, LockError, PersistError, ProjectError, RuleError, StoreError, TeamError};
pub use events::{EventLog, LogEntry};
pub use friction::{FrictionCheck, FrictionContext, FrictionSystem, FrictionTrigger};
pub use lock::{LockMode, LockStrategy, Locker, LockingInfo, NativeLocker, ProcessLocker};
pub use presets::{Preset, PresetCatalog};
pub use project::{CodingOutcome, Project};
pub use rules::{FrictionLevel, IsolationRule, RuleStatusReport};
pub use saturation::{SaturationAssessment, SaturationLevel, SaturationTracking};
pub use store::{LoadOrigin, Loaded, StateStore, StatusSummary};
pub use strain::{OverrideOutcome, Resolution, StrainDetector, StrainReport};
pub use team::{ResearcherTeam, Role};

/// Records buffered before an automatic flush
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Manually coded documents required before leaving stage1
pub const DEFAULT_MIN_MANUAL_DOCUMENTS: u64 = 10;

/// Overrides within one phase that mark a rule as strained
pub const DEFAULT_STRAIN_THRESHOLD: u32 = 3;
