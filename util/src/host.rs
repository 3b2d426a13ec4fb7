//! Host platform (linux for example) utility functions

use std::path::PathBuf;
use uname;

/// Environment variable holding the root directory of the software, under which the `params` and
/// `sessions` directories live.
pub const SW_ROOT_ENV_VAR: &str = "CTRL_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
