//! Unified event logging for the lowering pipeline.
//!
//! Every pass records what it rewrote into an [`EventLog`]. Events can be inspected for
//! debugging, summarized by the driver, or ignored.
//!
//! # Architecture
//!
//! The system is built around three main types:
//!
//! - [`Event`] - A single recorded event (rewrite, warning, pass boundary, ...)
//! - [`EventLog`] - Append-only collection with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//!
//! # Example
//!
//! ```rust
//! use genlower::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::LoopMarked)
//!     .function("k")
//!     .message("loop at bb2 forced to unroll");
//! log.record(EventKind::PassStarted).pass("unroll-advisor");
//!
//! assert_eq!(log.count_kind(EventKind::LoopMarked), 1);
//! assert_eq!(log.summary(), "1 loop marked for unrolling");
//! ```

use std::{collections::HashMap, fmt};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A constant expression was materialized as instructions.
    ConstantExpanded,
    /// Calling convention, linkage or inline attributes were normalized.
    AttributesNormalized,
    /// The no-duplicate attribute of a barrier function was toggled.
    BarrierToggled,
    /// A call was inlined.
    FunctionInlined,
    /// A function was removed from the module.
    FunctionRemoved,
    /// An oversized integer value was split into limbs.
    IntegerSplit,
    /// An oversized parameter was split into limb parameters.
    ParameterSplit,
    /// A vector value was replaced by scalar lanes.
    VectorScalarized,
    /// Vector lanes were spilled to the stack for a dynamic extract.
    LanesSpilled,
    /// A structured address computation was lowered to integer arithmetic.
    AddressLowered,
    /// Adjacent scalar accesses were merged into one vector access.
    AccessesMerged,
    /// A loop was marked for forced unrolling.
    LoopMarked,
    /// A sampler predicate call was folded.
    SamplerFolded,
    /// A block literal was bound to its invoke function.
    BlockBound,
    /// An indirect block call was resolved to a direct call.
    CallResolved,
    /// A block invoke function was cloned as a kernel.
    KernelCloned,
    /// An enqueue call site was rewritten.
    EnqueueRewritten,
    /// A function was pulled in from the library.
    FunctionLinked,
    /// A symbol was given internal linkage.
    SymbolInternalized,

    /// A pipeline stage started.
    PassStarted,
    /// A pipeline stage completed.
    PassCompleted,

    /// Something unexpected but recoverable.
    Warning,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::ConstantExpanded => "constant expression expanded",
            Self::AttributesNormalized => "attributes normalized",
            Self::BarrierToggled => "barrier attribute toggled",
            Self::FunctionInlined => "call inlined",
            Self::FunctionRemoved => "function removed",
            Self::IntegerSplit => "integer split",
            Self::ParameterSplit => "parameter split",
            Self::VectorScalarized => "vector scalarized",
            Self::LanesSpilled => "lanes spilled",
            Self::AddressLowered => "address lowered",
            Self::AccessesMerged => "accesses merged",
            Self::LoopMarked => "loop marked for unrolling",
            Self::SamplerFolded => "sampler predicate folded",
            Self::BlockBound => "block literal bound",
            Self::CallResolved => "block call resolved",
            Self::KernelCloned => "block kernel cloned",
            Self::EnqueueRewritten => "enqueue rewritten",
            Self::FunctionLinked => "function linked",
            Self::SymbolInternalized => "symbol internalized",
            // Engine
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::Warning => "warning",
        }
    }

    /// Returns true if this event represents a rewrite of the module.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !matches!(self, Self::PassStarted | Self::PassCompleted | Self::Warning)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function where the event occurred (if applicable).
    pub function: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "[{}] @{}: {}", self.kind, function, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder is
/// dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<String>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function the event belongs to.
    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            function: self.function.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Append-only collection of pipeline events.
///
/// Statistics are derived from the events rather than tracked separately. Events can be
/// appended through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let copy = Self::new();
        for event in self.iter() {
            copy.events.push(event.clone());
        }
        copy
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of transformation events.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.transformations().count()
    }

    /// Generates a human-readable summary of all events.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}
