//! CLI command implementations.
//!
//! | Module    | Commands handled            |
//! |-----------|-----------------------------|
//! | `corpus`  | `Sync`, `Search`, `Status`  |
//! | `cleanup` | `Cleanup`                   |
//! | `config`  | `Config`                    |
//! | `session` | `Session`                   |

pub mod cleanup;
pub mod config;
pub mod corpus;
pub mod session;

pub use cleanup::cmd_cleanup;
pub use config::cmd_config;
pub use corpus::{cmd_search, cmd_status, cmd_sync};
pub use session::cmd_session;
