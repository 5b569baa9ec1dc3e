//! Timed parameter commands
//!
//! A command drives one source parameter linearly from a start value to an
//! end value over a fixed duration. Commands are advanced by the maintenance
//! sweep; elapsed time is accumulated from the clock readings of successive
//! sweeps, so progress does not depend on how often the sweep runs.

use std::time::Duration;

use glam::{Vec2, Vec3};

/// Pool-unique identifier of a source; never reused within a manager
pub type SourceKey = u64;

/// Value layout of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    Pair,
    Vector,
}

/// Interpolatable source parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Pitch,
    Gain,
    MaxDistance,
    RolloffFactor,
    ReferenceDistance,
    ConeOuterGain,
    /// Inner and outer cone angles in degrees
    ConeAngles,
    Position,
    Velocity,
    Direction,
}

impl ParamKind {
    /// Shape of the values this parameter takes
    pub fn shape(self) -> ValueShape {
        match self {
            ParamKind::Pitch
            | ParamKind::Gain
            | ParamKind::MaxDistance
            | ParamKind::RolloffFactor
            | ParamKind::ReferenceDistance
            | ParamKind::ConeOuterGain => ValueShape::Scalar,
            ParamKind::ConeAngles => ValueShape::Pair,
            ParamKind::Position | ParamKind::Velocity | ParamKind::Direction => {
                ValueShape::Vector
            }
        }
    }

    /// Whether `value` has this parameter's shape and lies in the range a
    /// backend accepts for it.
    ///
    /// Every range is convex, so a command whose endpoints pass never
    /// interpolates outside it.
    pub fn accepts(self, value: ParamValue) -> bool {
        let within = |v: f32, max: f32| v.is_finite() && (0.0..=max).contains(&v);
        match (self, value) {
            (ParamKind::ConeOuterGain, ParamValue::Scalar(v)) => within(v, 1.0),
            (_, ParamValue::Scalar(v)) if self.shape() == ValueShape::Scalar => {
                within(v, f32::MAX)
            }
            (ParamKind::ConeAngles, ParamValue::Pair(angles)) => {
                within(angles.x, 360.0) && within(angles.y, 360.0)
            }
            (_, ParamValue::Vector(v)) if self.shape() == ValueShape::Vector => v.is_finite(),
            _ => false,
        }
    }
}

/// A parameter value tagged with its shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Scalar(f32),
    Pair(Vec2),
    Vector(Vec3),
}

impl ParamValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            ParamValue::Scalar(_) => ValueShape::Scalar,
            ParamValue::Pair(_) => ValueShape::Pair,
            ParamValue::Vector(_) => ValueShape::Vector,
        }
    }

    /// `self + (end - self) * t`; `None` when the shapes differ
    pub fn lerp(self, end: ParamValue, t: f32) -> Option<ParamValue> {
        match (self, end) {
            (ParamValue::Scalar(a), ParamValue::Scalar(b)) => {
                Some(ParamValue::Scalar(a + (b - a) * t))
            }
            (ParamValue::Pair(a), ParamValue::Pair(b)) => Some(ParamValue::Pair(a.lerp(b, t))),
            (ParamValue::Vector(a), ParamValue::Vector(b)) => {
                Some(ParamValue::Vector(a.lerp(b, t)))
            }
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match *self {
            ParamValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<Vec2> {
        match *self {
            ParamValue::Pair(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vec3> {
        match *self {
            ParamValue::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Scalar(v)
    }
}

impl From<Vec2> for ParamValue {
    fn from(v: Vec2) -> Self {
        ParamValue::Pair(v)
    }
}

impl From<Vec3> for ParamValue {
    fn from(v: Vec3) -> Self {
        ParamValue::Vector(v)
    }
}

/// One in-flight interpolation
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub source: SourceKey,
    pub kind: ParamKind,
    pub start: ParamValue,
    pub end: ParamValue,
    pub duration: Duration,
    elapsed: Duration,
    last_update: Duration,
}

impl Command {
    /// Create a command submitted at clock time `now`.
    ///
    /// Returns `None` if `start`/`end` do not match the shape of `kind`.
    pub fn new(
        source: SourceKey,
        kind: ParamKind,
        start: ParamValue,
        end: ParamValue,
        duration: Duration,
        now: Duration,
    ) -> Option<Self> {
        if start.shape() != kind.shape() || end.shape() != kind.shape() {
            return None;
        }
        Some(Self {
            source,
            kind,
            start,
            end,
            duration,
            elapsed: Duration::ZERO,
            last_update: now,
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Accumulate time up to `now` and return the progress fraction in `[0, 1]`
    pub fn advance(&mut self, now: Duration) -> f32 {
        let step = now.saturating_sub(self.last_update);
        self.last_update = self.last_update.max(now);
        self.elapsed = (self.elapsed + step).min(self.duration);
        self.progress()
    }

    pub fn progress(&self) -> f32 {
        if self.duration.is_zero() || self.elapsed >= self.duration {
            1.0
        } else {
            (self.elapsed.as_nanos() as f64 / self.duration.as_nanos() as f64) as f32
        }
    }

    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Interpolated value at progress `t`; exactly `end` once done
    pub fn value_at(&self, t: f32) -> ParamValue {
        if t >= 1.0 {
            return self.end;
        }
        // Shapes were validated at construction.
        self.start.lerp(self.end, t).unwrap_or(self.end)
    }
}

/// FIFO queue of in-flight commands
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Number of commands targeting `source`
    pub fn count_for(&self, source: SourceKey) -> usize {
        self.commands.iter().filter(|c| c.source == source).count()
    }

    /// Drop every command targeting `source`
    pub fn remove_for(&mut self, source: SourceKey) -> usize {
        let before = self.commands.len();
        self.commands.retain(|c| c.source != source);
        before - self.commands.len()
    }

    /// Advance every command to `now` in submission order and hand each
    /// interpolated value to `apply`; finished commands are retired.
    ///
    /// A command whose value `apply` rejects is retired as well, and the
    /// remaining commands still run. The rejections are returned in order.
    pub fn execute<E>(
        &mut self,
        now: Duration,
        mut apply: impl FnMut(SourceKey, ParamKind, ParamValue) -> Result<(), E>,
    ) -> Vec<(Command, E)> {
        let mut rejected = Vec::new();
        self.commands.retain_mut(|command| {
            let t = command.advance(now);
            match apply(command.source, command.kind, command.value_at(t)) {
                Ok(()) => !command.is_done(),
                Err(err) => {
                    rejected.push((command.clone(), err));
                    false
                }
            }
        });
        rejected
    }
}
