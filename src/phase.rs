//! Electrical phases and per-phase value containers
//!
//! Every current in the system is tracked per phase. `PhaseValues` is a fixed
//! three-slot container indexed by `Phase`; a slot that holds `None` means the
//! phase is not present (single-phase installs, a charger that does not report
//! a phase, a missing meter reading).

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// One conductor of the supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    /// All phases in order
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    /// Slot index of the phase
    pub const fn index(self) -> usize {
        match self {
            Phase::L1 => 0,
            Phase::L2 => 1,
            Phase::L3 => 2,
        }
    }

    /// The first `count` phases of an installation (1 = L1 only)
    pub fn first(count: usize) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().take(count)
    }

    /// Lowercase key as used in configuration and events
    pub const fn key(self) -> &'static str {
        match self {
            Phase::L1 => "l1",
            Phase::L2 => "l2",
            Phase::L3 => "l3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::L1 => write!(f, "L1"),
            Phase::L2 => write!(f, "L2"),
            Phase::L3 => write!(f, "L3"),
        }
    }
}

/// Per-phase values with explicit absence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseValues<T> {
    slots: [Option<T>; 3],
}

impl<T> Default for PhaseValues<T> {
    fn default() -> Self {
        Self {
            slots: [None, None, None],
        }
    }
}

impl<T> PhaseValues<T> {
    /// Empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a closure over the given phases
    pub fn from_fn<I, F>(phases: I, mut f: F) -> Self
    where
        I: IntoIterator<Item = Phase>,
        F: FnMut(Phase) -> T,
    {
        let mut out = Self::new();
        for phase in phases {
            out.set(phase, f(phase));
        }
        out
    }

    pub fn get(&self, phase: Phase) -> Option<&T> {
        self.slots[phase.index()].as_ref()
    }

    pub fn get_mut(&mut self, phase: Phase) -> Option<&mut T> {
        self.slots[phase.index()].as_mut()
    }

    /// Set a phase value, returning the previous one
    pub fn set(&mut self, phase: Phase, value: T) -> Option<T> {
        self.slots[phase.index()].replace(value)
    }

    pub fn remove(&mut self, phase: Phase) -> Option<T> {
        self.slots[phase.index()].take()
    }

    pub fn contains(&self, phase: Phase) -> bool {
        self.slots[phase.index()].is_some()
    }

    /// Present phases in L1..L3 order
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        Phase::ALL.into_iter().filter(move |p| self.contains(*p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, &T)> {
        Phase::ALL
            .into_iter()
            .zip(self.slots.iter())
            .filter_map(|(phase, slot)| slot.as_ref().map(|v| (phase, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Phase, &mut T)> {
        Phase::ALL
            .into_iter()
            .zip(self.slots.iter_mut())
            .filter_map(|(phase, slot)| slot.as_mut().map(|v| (phase, v)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transform every present value
    pub fn map<U, F: FnMut(&T) -> U>(&self, mut f: F) -> PhaseValues<U> {
        let mut out = PhaseValues::new();
        for (phase, value) in self.iter() {
            out.set(phase, f(value));
        }
        out
    }
}

impl<T: Copy> PhaseValues<T> {
    /// Same value on every given phase
    pub fn uniform<I: IntoIterator<Item = Phase>>(phases: I, value: T) -> Self {
        Self::from_fn(phases, |_| value)
    }

    /// Copied value for a phase
    pub fn value(&self, phase: Phase) -> Option<T> {
        self.slots[phase.index()]
    }
}

impl<T: Copy + Ord> PhaseValues<T> {
    /// Smallest present value
    pub fn min_value(&self) -> Option<T> {
        self.iter().map(|(_, v)| *v).min()
    }
}

impl<T> FromIterator<(Phase, T)> for PhaseValues<T> {
    fn from_iter<I: IntoIterator<Item = (Phase, T)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (phase, value) in iter {
            out.set(phase, value);
        }
        out
    }
}

impl<T, const N: usize> From<[(Phase, T); N]> for PhaseValues<T> {
    fn from(entries: [(Phase, T); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<T: Serialize> Serialize for PhaseValues<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (phase, value) in self.iter() {
            map.serialize_entry(phase.key(), value)?;
        }
        map.end()
    }
}

impl<T: fmt::Display> fmt::Display for PhaseValues<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (phase, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", phase, value)?;
        }
        write!(f, "}}")
    }
}
