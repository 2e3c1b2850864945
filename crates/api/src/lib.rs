//! Kahoy run orchestration.
//!
//! A [`Runner`] loads the OLD and NEW manifest snapshots, filters both through
//! the processor chain, plans the difference, hands deletions and then
//! applications to the manager chain and finally records the run in every
//! configured state repository. Frontends either call [`Runner::run`] or split
//! it into [`Runner::prepare`] and [`Runner::execute`] to confirm the plan first.

#![forbid(unsafe_code)]

use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

mod groups;
pub mod managers;
pub mod options;
mod runner;

pub use groups::LayeredGroups;
pub use managers::{ChainManagerFactory, ManagerFactory, ManagerMode};
pub use options::{ApplyOptions, RunMode};
pub use runner::{EmptyLoader, RunPlan, Runner};

static STATE_IDS: Lazy<Mutex<ulid::Generator>> = Lazy::new(|| Mutex::new(ulid::Generator::new()));

/// ULID timestamped at `at`; ids from one process are strictly increasing.
pub fn new_state_id(at: DateTime<Utc>) -> Result<String> {
    let mut gen = STATE_IDS.lock().map_err(|_| anyhow!("state id generator poisoned"))?;
    let id = gen.generate_from_datetime(SystemTime::from(at)).map_err(|e| anyhow!("generating state id: {}", e))?;
    Ok(id.to_string())
}
