use serde::Serialize;

use crate::types::{merge_optional, Type};

/// Invocation of a method body: the target of `return`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FrameId(pub u32);

/// A yielding call expanded at one site: the target of a block `break`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallSiteId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoopId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakTarget {
    Call(CallSiteId),
    Loop(LoopId),
}

/// Abstract outcome of evaluating a statement sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Normal(Type),
    Return { target: FrameId, ty: Type },
    Break { target: BreakTarget, ty: Type },
}

/// Every completion a sequence can reach, merged per kind and target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionSet {
    normal: Option<Type>,
    returns: Vec<(FrameId, Type)>,
    breaks: Vec<(BreakTarget, Type)>,
}

impl CompletionSet {
    pub fn normal(ty: Type) -> Self {
        Self {
            normal: Some(ty),
            ..Self::default()
        }
    }

    /// No reachable completion at all: evaluation never finishes.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn returning(target: FrameId, ty: Type) -> Self {
        let mut set = Self::never();
        set.add(Completion::Return { target, ty });
        set
    }

    pub fn breaking(target: BreakTarget, ty: Type) -> Self {
        let mut set = Self::never();
        set.add(Completion::Break { target, ty });
        set
    }

    pub fn add(&mut self, completion: Completion) {
        match completion {
            Completion::Normal(ty) => self.merge_normal(Some(ty)),
            Completion::Return { target, ty } => {
                match self.returns.iter_mut().find(|(at, _)| *at == target) {
                    Some(entry) => entry.1 = entry.1.union_with(&ty),
                    None => self.returns.push((target, ty)),
                }
            }
            Completion::Break { target, ty } => {
                match self.breaks.iter_mut().find(|(at, _)| *at == target) {
                    Some(entry) => entry.1 = entry.1.union_with(&ty),
                    None => self.breaks.push((target, ty)),
                }
            }
        }
    }

    pub fn merge_normal(&mut self, ty: Option<Type>) {
        self.normal = merge_optional(self.normal.take(), ty);
    }

    /// Completions of either of two alternative paths.
    pub fn join(mut self, other: CompletionSet) -> Self {
        for completion in other.into_completions() {
            self.add(completion);
        }
        self
    }

    /// Completions of `self` followed by `next`; `next` only runs when `self` falls through.
    pub fn then(self, next: CompletionSet) -> Self {
        if !self.can_complete_normally() {
            return self;
        }
        self.without_normal().join(next)
    }

    pub fn normal_type(&self) -> Option<&Type> {
        self.normal.as_ref()
    }

    pub fn can_complete_normally(&self) -> bool {
        self.normal.is_some()
    }

    pub fn is_never(&self) -> bool {
        self.normal.is_none() && self.returns.is_empty() && self.breaks.is_empty()
    }

    pub fn without_normal(mut self) -> Self {
        self.normal = None;
        self
    }

    pub fn take_return(&mut self, target: FrameId) -> Option<Type> {
        let index = self.returns.iter().position(|(frame, _)| *frame == target)?;
        Some(self.returns.remove(index).1)
    }

    pub fn take_break(&mut self, target: BreakTarget) -> Option<Type> {
        let index = self.breaks.iter().position(|(site, _)| *site == target)?;
        Some(self.breaks.remove(index).1)
    }

    pub fn return_type(&self, target: FrameId) -> Option<&Type> {
        self.returns
            .iter()
            .find(|(frame, _)| *frame == target)
            .map(|(_, ty)| ty)
    }

    pub fn break_type(&self, target: BreakTarget) -> Option<&Type> {
        self.breaks
            .iter()
            .find(|(site, _)| *site == target)
            .map(|(_, ty)| ty)
    }

    pub fn into_completions(self) -> Vec<Completion> {
        let mut completions = Vec::new();
        if let Some(ty) = self.normal {
            completions.push(Completion::Normal(ty));
        }
        completions.extend(
            self.returns
                .into_iter()
                .map(|(target, ty)| Completion::Return { target, ty }),
        );
        completions.extend(
            self.breaks
                .into_iter()
                .map(|(target, ty)| Completion::Break { target, ty }),
        );
        completions
    }
}
