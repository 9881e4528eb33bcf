use std::fmt;

/// Failure reported by a hardware resource (clocked line or digital pin).
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum HwError {
    #[error("Hardware operation timed out")]
    Timeout,
    #[error("Hardware resource is busy")]
    Busy,
    #[error("Operation not supported by the hardware")]
    Unsupported,
    #[error("Hardware operation failed")]
    Failed,
}

/// Step of a port bring-up or shutdown sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BringUpStep {
    LineConfig,
    ResetPin,
    DataPin,
    InputPin,
    Emit,
}

impl fmt::Display for BringUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BringUpStep::LineConfig => "clocked line configuration",
            BringUpStep::ResetPin => "reset pin configuration",
            BringUpStep::DataPin => "data pin configuration",
            BringUpStep::InputPin => "input pin configuration",
            BringUpStep::Emit => "sequence emission",
        };
        f.write_str(name)
    }
}

/// A bring-up sequence that stopped at `step`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Port bring-up failed during {step}: {source}")]
pub struct SequenceError {
    pub step: BringUpStep,
    #[source]
    pub source: HwError,
}

impl SequenceError {
    pub fn new(step: BringUpStep, source: HwError) -> SequenceError {
        SequenceError { step, source }
    }
}

/// Returned by `JTAG_Configure` when the scan chain does not fit.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Scan chain of {count} devices exceeds the maximum of {max}")]
pub struct ChainTooLong {
    pub count: usize,
    pub max: usize,
}
