//! Positional matching of declared dependency ids.
//!
//! Bundlers hand out ids in definition order, so a module's dependency list
//! often has a stable shape even when the ids themselves move between
//! releases. A [`DependencyPattern`] describes that shape slot by slot.

use crate::error::{ModuleError, Result};
use crate::record::{Dependency, ModuleId};

/// Reference point for a relative slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeTo {
    /// `candidate id + offset`.
    Candidate(i64),
    /// `id bound at an earlier slot + offset`.
    Slot { index: usize, offset: i64 },
}

/// One position of a dependency pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Exact(ModuleId),
    /// Any of the listed ids ("loose" slot).
    AnyOf(Vec<ModuleId>),
    Relative(RelativeTo),
    /// The host placeholder for an absent dependency.
    Placeholder,
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPattern {
    slots: Vec<Slot>,
}

impl DependencyPattern {
    /// Relative slots may only refer to slots before them.
    pub fn new(slots: Vec<Slot>) -> Result<Self> {
        for (position, slot) in slots.iter().enumerate() {
            if let Slot::Relative(RelativeTo::Slot { index, .. }) = slot
                && *index >= position
            {
                return Err(ModuleError::InvalidPattern(format!(
                    "slot {position} refers to slot {index}, which is not matched yet"
                )));
            }
            if let Slot::AnyOf(ids) = slot
                && ids.is_empty()
            {
                return Err(ModuleError::InvalidPattern(format!(
                    "slot {position} accepts no ids"
                )));
            }
        }
        Ok(Self { slots })
    }

    pub fn builder() -> DependencyPatternBuilder {
        DependencyPatternBuilder::default()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Walk `dependencies` against the slots. Lengths must agree.
    pub fn matches(&self, candidate: ModuleId, dependencies: &[Dependency]) -> bool {
        if dependencies.len() != self.slots.len() {
            return false;
        }
        self.slots
            .iter()
            .zip(dependencies)
            .all(|(slot, dependency)| match slot {
                Slot::Wildcard => true,
                Slot::Placeholder => *dependency == Dependency::Placeholder,
                Slot::Exact(id) => dependency.id() == Some(*id),
                Slot::AnyOf(ids) => dependency.id().is_some_and(|d| ids.contains(&d)),
                Slot::Relative(RelativeTo::Candidate(offset)) => {
                    dependency.id().is_some() && dependency.id() == candidate.offset(*offset)
                }
                Slot::Relative(RelativeTo::Slot { index, offset }) => {
                    let bound = dependencies.get(*index).and_then(|d| d.id());
                    match (bound.and_then(|b| b.offset(*offset)), dependency.id()) {
                        (Some(expected), Some(actual)) => expected == actual,
                        _ => false,
                    }
                }
            })
    }

    /// Short textual form used in filter keys, e.g. `[3,4|5,self-1,_,null]`.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Exact(id) => id.to_string(),
                Slot::AnyOf(ids) => ids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|"),
                Slot::Relative(RelativeTo::Candidate(offset)) => format!("self{offset:+}"),
                Slot::Relative(RelativeTo::Slot { index, offset }) => format!("${index}{offset:+}"),
                Slot::Placeholder => "null".to_string(),
                Slot::Wildcard => "_".to_string(),
            })
            .collect();
        format!("[{}]", parts.join(","))
    }
}

/// Incremental construction of a [`DependencyPattern`].
#[derive(Debug, Default)]
pub struct DependencyPatternBuilder {
    slots: Vec<Slot>,
}

impl DependencyPatternBuilder {
    pub fn exact(mut self, id: u32) -> Self {
        self.slots.push(Slot::Exact(ModuleId(id)));
        self
    }

    pub fn any_of(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.slots
            .push(Slot::AnyOf(ids.into_iter().map(ModuleId).collect()));
        self
    }

    pub fn relative_to_candidate(mut self, offset: i64) -> Self {
        self.slots.push(Slot::Relative(RelativeTo::Candidate(offset)));
        self
    }

    pub fn relative_to_slot(mut self, index: usize, offset: i64) -> Self {
        self.slots
            .push(Slot::Relative(RelativeTo::Slot { index, offset }));
        self
    }

    pub fn placeholder(mut self) -> Self {
        self.slots.push(Slot::Placeholder);
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.slots.push(Slot::Wildcard);
        self
    }

    pub fn build(self) -> Result<DependencyPattern> {
        DependencyPattern::new(self.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(ids: &[Option<u32>]) -> Vec<Dependency> {
        ids.iter()
            .map(|id| id.map_or(Dependency::Placeholder, Dependency::from))
            .collect()
    }

    #[test]
    fn test_exact_and_loose_slots() {
        let pattern = DependencyPattern::builder()
            .exact(3)
            .any_of([4, 5])
            .build()
            .unwrap();
        assert!(pattern.matches(ModuleId(10), &deps(&[Some(3), Some(4)])));
        assert!(pattern.matches(ModuleId(11), &deps(&[Some(3), Some(5)])));
        assert!(!pattern.matches(ModuleId(12), &deps(&[Some(3), Some(6)])));
        assert!(!pattern.matches(ModuleId(12), &deps(&[Some(2), Some(4)])));
    }

    #[test]
    fn test_length_must_agree() {
        let pattern = DependencyPattern::builder().exact(3).wildcard().build().unwrap();
        assert!(!pattern.matches(ModuleId(1), &deps(&[Some(3)])));
        assert!(!pattern.matches(ModuleId(1), &deps(&[Some(3), Some(4), Some(5)])));
        assert!(pattern.matches(ModuleId(1), &deps(&[Some(3), None])));
    }

    #[test]
    fn test_relative_to_candidate() {
        let pattern = DependencyPattern::builder()
            .relative_to_candidate(-1)
            .wildcard()
            .build()
            .unwrap();
        assert!(pattern.matches(ModuleId(20), &deps(&[Some(19), Some(2)])));
        assert!(!pattern.matches(ModuleId(20), &deps(&[Some(18), Some(2)])));
        assert!(!pattern.matches(ModuleId(20), &deps(&[None, Some(2)])));
    }

    #[test]
    fn test_relative_to_earlier_slot() {
        let pattern = DependencyPattern::builder()
            .wildcard()
            .relative_to_slot(0, 1)
            .relative_to_slot(1, 1)
            .build()
            .unwrap();
        assert!(pattern.matches(ModuleId(50), &deps(&[Some(7), Some(8), Some(9)])));
        assert!(!pattern.matches(ModuleId(50), &deps(&[Some(7), Some(9), Some(10)])));
        // A placeholder cannot anchor an offset.
        assert!(!pattern.matches(ModuleId(50), &deps(&[None, Some(1), Some(2)])));
    }

    #[test]
    fn test_placeholder_slot() {
        let pattern = DependencyPattern::builder().placeholder().exact(1).build().unwrap();
        assert!(pattern.matches(ModuleId(2), &deps(&[None, Some(1)])));
        assert!(!pattern.matches(ModuleId(2), &deps(&[Some(0), Some(1)])));
    }

    #[test]
    fn test_forward_references_are_rejected() {
        let err = DependencyPattern::builder()
            .relative_to_slot(0, 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidPattern(_)));

        let err = DependencyPattern::new(vec![Slot::AnyOf(vec![])]).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidPattern(_)));
    }

    #[test]
    fn test_describe_is_stable() {
        let pattern = DependencyPattern::builder()
            .exact(3)
            .any_of([4, 5])
            .relative_to_candidate(-1)
            .relative_to_slot(0, 2)
            .wildcard()
            .placeholder()
            .build()
            .unwrap();
        assert_eq!(pattern.describe(), "[3,4|5,self-1,$0+2,_,null]");
    }
}
