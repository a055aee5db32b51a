//! Data Flow FSM State Definitions
//!
//! State IDs are stored as SMALLINT in `data_flows_tb.state`.

use std::fmt;

/// Data flow lifecycle states
///
/// ```text
/// RECEIVED → PROVISIONING → PROVISIONED → STARTED ⇄ SUSPENDED
///     └──────────────────────────────────────┘  ↓        ↓
///                                     COMPLETED | TERMINATED
///
/// any non-terminal ──▶ FAILED
/// ```
///
/// Terminal states: COMPLETED (600), TERMINATED (700), FAILED (800)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum DataFlowState {
    /// Initial state - start message validated and recorded
    Received = 100,

    /// Provision hook invoked, resources not yet all complete
    Provisioning = 200,

    /// All declared provision resources reported complete
    Provisioned = 300,

    /// Start hook succeeded - transfer is running
    Started = 400,

    /// Paused by a suspend request, can be recovered
    Suspended = 500,

    /// Terminal: transfer finished
    Completed = 600,

    /// Terminal: stopped by a terminate request
    Terminated = 700,

    /// Terminal: a hook reported an unrecoverable error
    Failed = 800,
}

impl DataFlowState {
    pub const ALL: [DataFlowState; 8] = [
        DataFlowState::Received,
        DataFlowState::Provisioning,
        DataFlowState::Provisioned,
        DataFlowState::Started,
        DataFlowState::Suspended,
        DataFlowState::Completed,
        DataFlowState::Terminated,
        DataFlowState::Failed,
    ];

    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DataFlowState::Completed | DataFlowState::Terminated | DataFlowState::Failed
        )
    }

    /// Whether the FSM has an edge `self → next`.
    pub fn can_transition_to(&self, next: DataFlowState) -> bool {
        use DataFlowState::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Received, Provisioning)
                | (Received, Started)
                | (Provisioning, Provisioned)
                | (Provisioned, Started)
                | (Started, Suspended)
                | (Started, Completed)
                | (Started, Terminated)
                | (Suspended, Started)
                | (Suspended, Terminated)
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            100 => Some(DataFlowState::Received),
            200 => Some(DataFlowState::Provisioning),
            300 => Some(DataFlowState::Provisioned),
            400 => Some(DataFlowState::Started),
            500 => Some(DataFlowState::Suspended),
            600 => Some(DataFlowState::Completed),
            700 => Some(DataFlowState::Terminated),
            800 => Some(DataFlowState::Failed),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFlowState::Received => "RECEIVED",
            DataFlowState::Provisioning => "PROVISIONING",
            DataFlowState::Provisioned => "PROVISIONED",
            DataFlowState::Started => "STARTED",
            DataFlowState::Suspended => "SUSPENDED",
            DataFlowState::Completed => "COMPLETED",
            DataFlowState::Terminated => "TERMINATED",
            DataFlowState::Failed => "FAILED",
        }
    }

    /// Parse a state name as produced by [`DataFlowState::as_str`]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DataFlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for DataFlowState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        DataFlowState::from_id(value).ok_or(())
    }
}
