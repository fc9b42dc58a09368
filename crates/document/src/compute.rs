//! Backend compute jobs (position-velocity cuts and moment maps) and the
//! per-frame state machine that tracks them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeKind {
    Pv,
    Moment,
}

/// Inclusive channel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRange {
    pub min: u32,
    pub max: u32,
}

impl ChannelRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Swaps reversed bounds and widens an empty range by one channel so
    /// that `min < max` holds inside `[0, depth)`.
    pub fn normalized(self, depth: u32) -> Self {
        let (mut min, mut max) = if self.min > self.max {
            (self.max, self.min)
        } else {
            (self.min, self.max)
        };
        let last = depth.saturating_sub(1);
        max = max.min(last);
        min = min.min(max);
        if min == max {
            if max < last {
                max += 1;
            } else {
                min = min.saturating_sub(1);
            }
        }
        Self { min, max }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PvRequest {
    pub file_id: i32,
    pub region_id: i32,
    pub width: u32,
    pub spectral_range: Option<ChannelRange>,
    pub reverse: bool,
    pub keep: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Moment {
    Mean,
    Integrated,
    WeightedCoordinate,
    WeightedDispersion,
    Median,
    MedianCoordinate,
    StandardDeviation,
    Rms,
    AbsMeanDeviation,
    Max,
    MaxCoordinate,
    Min,
    MinCoordinate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MomentMask {
    None,
    Include { min: f32, max: f32 },
    Exclude { min: f32, max: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MomentRequest {
    pub file_id: i32,
    pub region_id: i32,
    pub moments: Vec<Moment>,
    pub spectral_range: ChannelRange,
    pub mask: MomentMask,
    pub keep: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeRequest {
    Pv(PvRequest),
    Moment(MomentRequest),
}

impl ComputeRequest {
    pub fn kind(&self) -> ComputeKind {
        match self {
            ComputeRequest::Pv(_) => ComputeKind::Pv,
            ComputeRequest::Moment(_) => ComputeKind::Moment,
        }
    }

    pub fn file_id(&self) -> i32 {
        match self {
            ComputeRequest::Pv(request) => request.file_id,
            ComputeRequest::Moment(request) => request.file_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    UnknownFrame,
    FileMismatch { expected: i32, actual: i32 },
    Busy(ComputeKind),
    NotRunning(ComputeKind),
    EmptyMomentList,
    Backend(String),
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::UnknownFrame => write!(f, "compute request for unknown frame"),
            ComputeError::FileMismatch { expected, actual } => {
                write!(f, "request targets file {actual}, frame shows file {expected}")
            }
            ComputeError::Busy(kind) => write!(f, "{kind:?} job already running"),
            ComputeError::NotRunning(kind) => write!(f, "no {kind:?} job to cancel"),
            ComputeError::EmptyMomentList => write!(f, "moment request lists no moments"),
            ComputeError::Backend(message) => write!(f, "compute backend: {message}"),
        }
    }
}

impl std::error::Error for ComputeError {}

/// Service that runs compute jobs. Results come back as [`ComputeEvent`]s.
pub trait ComputeBackend {
    fn submit(&mut self, request: ComputeRequest) -> Result<(), ComputeError>;

    /// Asks the backend to stop. Delivery of a terminal event is not
    /// guaranteed to be immediate.
    fn cancel(&mut self, file_id: i32, kind: ComputeKind);
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComputeEvent {
    Progress {
        file_id: i32,
        kind: ComputeKind,
        progress: f32,
    },
    Completed {
        file_id: i32,
        kind: ComputeKind,
    },
    Failed {
        file_id: i32,
        kind: ComputeKind,
        message: String,
    },
    Cancelled {
        file_id: i32,
        kind: ComputeKind,
    },
}

impl ComputeEvent {
    pub fn file_id(&self) -> i32 {
        match self {
            ComputeEvent::Progress { file_id, .. }
            | ComputeEvent::Completed { file_id, .. }
            | ComputeEvent::Failed { file_id, .. }
            | ComputeEvent::Cancelled { file_id, .. } => *file_id,
        }
    }

    pub fn kind(&self) -> ComputeKind {
        match self {
            ComputeEvent::Progress { kind, .. }
            | ComputeEvent::Completed { kind, .. }
            | ComputeEvent::Failed { kind, .. }
            | ComputeEvent::Cancelled { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ComputeState {
    #[default]
    Idle,
    Running {
        progress: f32,
    },
    Cancelling {
        progress: f32,
    },
}

impl ComputeState {
    pub fn is_active(&self) -> bool {
        !matches!(self, ComputeState::Idle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSlot {
    state: ComputeState,
    last_outcome: Option<ComputeOutcome>,
}

impl JobSlot {
    pub fn state(&self) -> ComputeState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<&ComputeOutcome> {
        self.last_outcome.as_ref()
    }

    pub(crate) fn start(&mut self, kind: ComputeKind) -> Result<(), ComputeError> {
        if self.state.is_active() {
            return Err(ComputeError::Busy(kind));
        }
        self.state = ComputeState::Running { progress: 0.0 };
        Ok(())
    }

    pub(crate) fn begin_cancel(&mut self, kind: ComputeKind) -> Result<(), ComputeError> {
        match self.state {
            ComputeState::Running { progress } => {
                self.state = ComputeState::Cancelling { progress };
                Ok(())
            }
            ComputeState::Cancelling { .. } => Ok(()),
            ComputeState::Idle => Err(ComputeError::NotRunning(kind)),
        }
    }

    /// Applies a backend event. Returns the terminal outcome, if any.
    pub(crate) fn apply(&mut self, event: &ComputeEvent) -> Option<ComputeOutcome> {
        let outcome = match event {
            ComputeEvent::Progress { progress, .. } => {
                let progress = progress.clamp(0.0, 1.0);
                match &mut self.state {
                    ComputeState::Running { progress: current }
                    | ComputeState::Cancelling { progress: current } => *current = progress,
                    ComputeState::Idle => {}
                }
                return None;
            }
            ComputeEvent::Completed { .. } => ComputeOutcome::Completed,
            ComputeEvent::Failed { message, .. } => ComputeOutcome::Failed(message.clone()),
            ComputeEvent::Cancelled { .. } => ComputeOutcome::Cancelled,
        };
        self.state = ComputeState::Idle;
        self.last_outcome = Some(outcome.clone());
        Some(outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeJobs {
    pv: JobSlot,
    moment: JobSlot,
}

impl ComputeJobs {
    pub fn slot(&self, kind: ComputeKind) -> &JobSlot {
        match kind {
            ComputeKind::Pv => &self.pv,
            ComputeKind::Moment => &self.moment,
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: ComputeKind) -> &mut JobSlot {
        match kind {
            ComputeKind::Pv => &mut self.pv,
            ComputeKind::Moment => &mut self.moment,
        }
    }

    pub fn state(&self, kind: ComputeKind) -> ComputeState {
        self.slot(kind).state()
    }
}
