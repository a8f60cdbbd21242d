// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Depth-first walk scheduler.
//!
//! A walk is driven by an explicit frame stack; each frame owns its place and
//! a FIFO of destinations queued by abilities. The loop below is the whole
//! algorithm:
//!
//! 1. Entering a place pushes its frame, records it in the path and runs the
//!    entry abilities (traveler-side, then place-side).
//! 2. The next destination comes from the topmost frame that still has one
//!    queued, so every queued child is entered (with all of its own
//!    descendants) before the next sibling.
//! 3. Once no frame has anything queued, the stack unwinds: the top frame
//!    runs its exit abilities once (place-side, then traveler-side) and pops.
//!    Exits therefore run in exact reverse entry order. An exit ability may
//!    queue more destinations; they are walked before unwinding resumes.
//! 4. `disengage` stops everything: no entry, descent or exit runs after it
//!    and remaining frames are discarded without their exits.
//!
//! Cancellation, the wall-clock budget and the step limit are checked at
//! every transition. Unreadable or missing destinations are skipped.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::ability::{AbilityFn, Event};
use crate::graph::{GraphError, GraphStore, NeighborQuery};
use crate::ident::{make_type_id, EdgeId, NodeId, ObjectId, TypeId};
use crate::registry::Registry;
use crate::value::{Fields, Value};

/// Shared cancellation flag, checked between frame transitions.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-walk limits.
#[derive(Clone, Debug, Default)]
pub struct WalkOptions {
    /// Wall-clock budget.
    pub budget: Option<Duration>,
    /// Maximum number of places entered.
    pub max_steps: Option<u64>,
    /// External cancellation.
    pub cancel: Option<CancelToken>,
}

/// Why a walk stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Halt {
    /// The frame stack drained.
    Completed,
    /// An ability called `disengage`.
    Disengaged,
    /// The cancel token fired.
    Cancelled,
    /// The wall-clock budget ran out.
    TimedOut,
    /// The step limit was reached.
    StepLimit,
}

impl Halt {
    /// Whether the walk's staged writes should be committed.
    pub const fn commits(self) -> bool {
        matches!(self, Self::Completed | Self::Disengaged)
    }
}

/// Trace record of one walk transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Entered a place.
    Entry(ObjectId),
    /// Began leaving a place.
    Exit(ObjectId),
}

/// An ability that returned an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Ability name.
    pub ability: &'static str,
    /// Place where it ran.
    pub place: ObjectId,
    /// Rendered error.
    pub error: String,
}

/// State carried by a traveler through one walk.
#[derive(Clone, Debug)]
pub struct Traveler {
    /// Traveler type.
    pub ty: TypeId,
    /// Mutable fields.
    pub fields: Fields,
    /// Places entered, in entry order.
    pub path: Vec<ObjectId>,
    /// Values reported so far.
    pub reports: Vec<Value>,
    /// Set by `disengage`.
    pub aborted: bool,
    /// Entry/exit transitions.
    pub trace: Vec<Step>,
    /// Abilities that failed.
    pub faults: Vec<Fault>,
}

impl Traveler {
    /// Creates a traveler that has not moved yet.
    pub fn new(ty: TypeId, fields: Fields) -> Self {
        Self {
            ty,
            fields,
            path: Vec::new(),
            reports: Vec::new(),
            aborted: false,
            trace: Vec::new(),
            faults: Vec::new(),
        }
    }
}

/// Outcome of a walk.
#[derive(Clone, Debug)]
pub struct TravelResult {
    /// Traveler type.
    pub traveler_type: TypeId,
    /// Final traveler fields.
    pub fields: Fields,
    /// Places entered, in entry order.
    pub path: Vec<ObjectId>,
    /// Reported values, in report order.
    pub reports: Vec<Value>,
    /// `true` when the walk disengaged.
    pub aborted: bool,
    /// Why the walk stopped.
    pub halt: Halt,
    /// Entry/exit transitions.
    pub trace: Vec<Step>,
    /// Abilities that failed.
    pub faults: Vec<Fault>,
    /// Places entered.
    pub steps: u64,
}

struct Frame {
    place: ObjectId,
    place_ty: TypeId,
    queue: VecDeque<ObjectId>,
    exits_done: bool,
}

/// Handle given to ability bodies.
pub struct Visit<'a> {
    graph: &'a mut GraphStore,
    traveler: &'a mut Traveler,
    queue: &'a mut VecDeque<ObjectId>,
    here: ObjectId,
    here_ty: TypeId,
    skipped: bool,
}

impl Visit<'_> {
    /// Current place.
    pub fn here(&self) -> ObjectId {
        self.here
    }

    /// Current place as an entity, when it is one.
    pub fn here_node(&self) -> Option<NodeId> {
        self.here.as_node()
    }

    /// Current place as a relationship, when it is one.
    pub fn here_edge(&self) -> Option<EdgeId> {
        self.here.as_edge()
    }

    /// Type of the current place.
    pub fn here_type(&self) -> TypeId {
        self.here_ty
    }

    /// Type of the traveler.
    pub fn traveler_type(&self) -> TypeId {
        self.traveler.ty
    }

    /// Traveler fields.
    pub fn fields(&self) -> &Fields {
        &self.traveler.fields
    }

    /// Mutable traveler fields.
    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.traveler.fields
    }

    /// Places entered so far, this one included.
    pub fn path(&self) -> &[ObjectId] {
        &self.traveler.path
    }

    /// Graph store of the walk's request.
    pub fn graph(&mut self) -> &mut GraphStore {
        self.graph
    }

    /// Neighbors of the current entity; empty when standing on a
    /// relationship.
    pub fn neighbors(&mut self, query: &NeighborQuery) -> Result<Vec<NodeId>, GraphError> {
        match self.here.as_node() {
            Some(node) => self.graph.neighbors(node, query),
            None => Ok(Vec::new()),
        }
    }

    /// Relationships of the current entity; empty when standing on a
    /// relationship.
    pub fn edges(&mut self, query: &NeighborQuery) -> Result<Vec<EdgeId>, GraphError> {
        match self.here.as_node() {
            Some(node) => self.graph.edges(node, query),
            None => Ok(Vec::new()),
        }
    }

    /// Queues every destination on this place's frame. Returns how many were
    /// queued.
    pub fn visit<I>(&mut self, dests: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<ObjectId>,
    {
        let before = self.queue.len();
        self.queue.extend(dests.into_iter().map(Into::into));
        self.queue.len() - before
    }

    /// Queues the single destination at `index`. Negative indices count from
    /// the end. Out of range selects nothing. Returns `true` when something
    /// was queued.
    pub fn visit_index<I>(&mut self, dests: I, index: isize) -> bool
    where
        I: IntoIterator,
        I::Item: Into<ObjectId>,
    {
        let dests: Vec<ObjectId> = dests.into_iter().map(Into::into).collect();
        let slot = if index >= 0 {
            usize::try_from(index).ok()
        } else {
            dests.len().checked_sub(index.unsigned_abs())
        };
        match slot.and_then(|i| dests.get(i)) {
            Some(dest) => {
                self.queue.push_back(*dest);
                true
            }
            None => false,
        }
    }

    /// Queues `dests`, or runs `otherwise` when `dests` is empty.
    pub fn visit_or_else<I, F>(&mut self, dests: I, otherwise: F) -> Result<(), GraphError>
    where
        I: IntoIterator,
        I::Item: Into<ObjectId>,
        F: FnOnce(&mut Self) -> Result<(), GraphError>,
    {
        if self.visit(dests) == 0 {
            otherwise(self)?;
        }
        Ok(())
    }

    /// Appends a value to the walk's report log.
    pub fn report(&mut self, value: impl Into<Value>) {
        self.traveler.reports.push(value.into());
    }

    /// Stops the walk immediately. Pending exits never run.
    pub fn disengage(&mut self) {
        self.traveler.aborted = true;
    }

    /// Stops the remaining abilities of the current event at this place.
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    /// Runs exactly one body: the block whose type is the closest ancestor
    /// of `subject`, or `default` when none applies. Equally close blocks
    /// resolve to the first one listed.
    pub fn dispatch(
        &mut self,
        subject: TypeId,
        blocks: &[(&str, AbilityFn)],
        default: AbilityFn,
    ) -> Result<(), GraphError> {
        let registry = Arc::clone(self.graph.registry());
        let candidates: Vec<TypeId> = blocks.iter().map(|(name, _)| make_type_id(name)).collect();
        let body = registry
            .types()
            .most_specific(subject, &candidates)
            .and_then(|i| blocks.get(i))
            .map_or(default, |(_, body)| *body);
        body(self)
    }
}

/// Drives one traveler over one request's graph.
pub struct WalkScheduler<'g> {
    graph: &'g mut GraphStore,
    registry: Arc<Registry>,
    options: WalkOptions,
    started: Instant,
    steps: u64,
}

impl<'g> WalkScheduler<'g> {
    /// Creates a scheduler over `graph`.
    pub fn new(graph: &'g mut GraphStore, options: WalkOptions) -> Self {
        let registry = Arc::clone(graph.registry());
        Self {
            graph,
            registry,
            options,
            started: Instant::now(),
            steps: 0,
        }
    }

    fn limit_reached(&self) -> Option<Halt> {
        if self.options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Some(Halt::Cancelled);
        }
        if self.options.budget.is_some_and(|b| self.started.elapsed() >= b) {
            return Some(Halt::TimedOut);
        }
        None
    }

    /// Walks `traveler` starting at `start` until the stack drains or the
    /// walk halts.
    ///
    /// Behavior errors are recorded as faults; storage errors abort the walk
    /// and are returned.
    pub fn run(mut self, mut traveler: Traveler, start: ObjectId) -> Result<TravelResult, GraphError> {
        self.started = Instant::now();
        let mut stack: Vec<Frame> = Vec::new();
        let mut pending: Option<(ObjectId, Option<ObjectId>)> = Some((start, None));

        let halt = loop {
            if let Some(halt) = self.limit_reached() {
                break halt;
            }
            if let Some((dest, from)) = pending.take() {
                if self.options.max_steps.is_some_and(|max| self.steps >= max) {
                    break Halt::StepLimit;
                }
                self.enter(&mut stack, &mut traveler, dest, from)?;
                if traveler.aborted {
                    break Halt::Disengaged;
                }
                continue;
            }
            if let Some(frame) = stack.iter_mut().rev().find(|f| !f.queue.is_empty()) {
                pending = frame.queue.pop_front().map(|next| (next, Some(frame.place)));
                continue;
            }
            let Some(top) = stack.last_mut() else {
                break Halt::Completed;
            };
            if top.exits_done {
                stack.pop();
                continue;
            }
            top.exits_done = true;
            let (place, place_ty) = (top.place, top.place_ty);
            let mut queue = VecDeque::new();
            debug!(%place, depth = stack.len(), "exit");
            traveler.trace.push(Step::Exit(place));
            self.fire(&mut traveler, place, place_ty, &mut queue, Event::Exit);
            if traveler.aborted {
                break Halt::Disengaged;
            }
            if let Some(top) = stack.last_mut() {
                top.queue.extend(queue);
            }
        };

        if halt != Halt::Completed {
            debug!(?halt, discarded = stack.len(), "walk halted");
        }
        Ok(TravelResult {
            traveler_type: traveler.ty,
            fields: traveler.fields,
            path: traveler.path,
            reports: traveler.reports,
            aborted: traveler.aborted,
            halt,
            trace: traveler.trace,
            faults: traveler.faults,
            steps: self.steps,
        })
    }

    fn enter(
        &mut self,
        stack: &mut Vec<Frame>,
        traveler: &mut Traveler,
        dest: ObjectId,
        from: Option<ObjectId>,
    ) -> Result<(), GraphError> {
        let Some(place_ty) = self.graph.readable_type(dest)? else {
            debug!(%dest, "skipping unreachable destination");
            return Ok(());
        };
        let mut queue = VecDeque::new();
        if let ObjectId::Edge(edge) = dest {
            let arrived_from = from.and_then(ObjectId::as_node);
            match self.graph.edge(edge) {
                Ok(record) => queue.push_back(ObjectId::Node(record.far_end(arrived_from))),
                Err(GraphError::NotFound(_) | GraphError::PermissionDenied { .. }) => {
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        self.steps += 1;
        debug!(place = %dest, depth = stack.len() + 1, "enter");
        traveler.path.push(dest);
        traveler.trace.push(Step::Entry(dest));
        self.fire(traveler, dest, place_ty, &mut queue, Event::Entry);
        stack.push(Frame {
            place: dest,
            place_ty,
            queue,
            exits_done: false,
        });
        Ok(())
    }

    fn fire(
        &mut self,
        traveler: &mut Traveler,
        place: ObjectId,
        place_ty: TypeId,
        queue: &mut VecDeque<ObjectId>,
        event: Event,
    ) {
        let registry = Arc::clone(&self.registry);
        for ability in registry.behaviors(traveler.ty, place_ty, event) {
            let mut visit = Visit {
                graph: &mut *self.graph,
                traveler: &mut *traveler,
                queue: &mut *queue,
                here: place,
                here_ty: place_ty,
                skipped: false,
            };
            let outcome = (ability.run)(&mut visit);
            let skipped = visit.skipped;
            if let Err(err) = outcome {
                warn!(ability = ability.name, %place, error = %err, "ability fault");
                traveler.faults.push(Fault {
                    ability: ability.name,
                    place,
                    error: err.to_string(),
                });
            }
            if traveler.aborted || skipped {
                break;
            }
        }
    }
}
