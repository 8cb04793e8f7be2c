use tracing::{info, warn};

use crate::device::{Device, Engine, RunState};
use crate::metrics::{record_instructions, set_run_state};

/// Instructions attempted per Step command.
pub const DEFAULT_STEP_BUDGET: u64 = 266_666;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Instructions executed by this call, including one that ended the run.
    pub executed: u64,
    pub state: RunState,
}

/// Run the device for at most `budget` instructions, stopping as soon as it
/// leaves `Running`. Whatever budget is left over is discarded. A device
/// that is not running does not move.
pub fn step<E: Engine>(device: &mut Device<E>, budget: u64) -> StepOutcome {
    let mut state = device.run_state();
    let mut executed = 0;

    while !state.is_terminal() && executed < budget {
        state = device.execute_one_cycle();
        executed += 1;
        match state {
            RunState::Done => info!(instructions = device.instructions(), "CPU done"),
            RunState::Crashed => warn!(instructions = device.instructions(), "CPU crashed"),
            RunState::Running => {}
        }
    }

    device.pump_console();
    record_instructions(executed);
    set_run_state(state);
    StepOutcome { executed, state }
}
