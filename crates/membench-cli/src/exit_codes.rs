//! Exit codes of the `membench` binary. Part of the contract with the
//! supervisor, which re-executes this binary once per run.

use membench_core::HarnessError;

pub const SUCCESS: i32 = 0;
pub const RUN_FAILED: i32 = 1; // A single run-instance did not finish
pub const CONFIG_ERROR: i32 = 2; // Bad selector, config or workload

/// Map an error escaping `dispatch` to an exit code.
pub fn from_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<HarnessError>())
        .map_or(CONFIG_ERROR, HarnessError::exit_code)
}
