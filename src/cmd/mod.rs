//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                         |
//! |----------|------------------------------------------|
//! | `run`    | `Run`                                    |
//! | `pool`   | `Sync`, `Servers`, `Health`, `Reset`     |
//! | `target` | `Status`                                 |

pub mod pool;
pub mod run;
pub mod target;

pub use pool::{cmd_health, cmd_reset, cmd_servers, cmd_sync};
pub use run::{RunArgs, cmd_run};
pub use target::cmd_status;

use anyhow::Result;
use egress_rotator::config::Config;
use egress_rotator::store::{ProgressStore, StoreHandle};

/// Open the progress store named by the configuration.
pub fn open_store(config: &Config) -> Result<StoreHandle> {
    Ok(StoreHandle::new(ProgressStore::new(&config.db_path)?))
}
