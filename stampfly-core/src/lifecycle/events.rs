//! Events that drive lifecycle transitions

/// Events that can trigger lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Caller asked to bring the peripheral up
    Initialize,
    /// Bring-up work finished successfully
    InitComplete,
    /// Caller (re)applied the stored configuration
    Configure,
    /// Caller started the peripheral
    Start,
    /// Caller stopped the peripheral
    Stop,
    /// Caller reset the peripheral
    Reset,
    /// A lifecycle operation failed
    Failed,
}
