//! Fluent collection API used by stages to contribute instructions.

use std::ops::{Deref, DerefMut};

use super::{GroupItem, GroupPath, Instruction, InstructionGroup};
use crate::stage::{StageContext, StageError, StageKind, StageRegistry};

/// Accumulates instructions and child groups for one group of the tree.
#[derive(Debug, Default)]
pub struct InstructionCollector {
    title: String,
    path: GroupPath,
    stage: Option<StageKind>,
    items: Vec<GroupItem>,
}

impl InstructionCollector {
    /// Creates a collector for a root group titled `title`.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Appends a leaf to the current group.
    pub fn collect_instruction(&mut self, instruction: Instruction) {
        let owned = instruction.in_group(self.path.clone());
        self.items.push(GroupItem::Instruction(owned));
    }

    /// Appends a wait for `name`, optionally preceded by the action that
    /// makes the remote side eventually raise it.
    pub fn collect_instruction_with_signal(&mut self, name: &str, instruction: Option<Instruction>) {
        if let Some(action) = instruction {
            self.collect_instruction(action);
        }
        self.collect_instruction(Instruction::signal(name));
    }

    /// Opens a child group. Instructions collected through the returned scope
    /// are attached to this group under `title` when the scope is dropped.
    pub fn collect_group(&mut self, title: impl Into<String>) -> GroupScope<'_> {
        self.open_scope(title.into(), None)
    }

    pub(crate) fn collect_stage_group(
        &mut self,
        stage: StageKind,
        title: impl Into<String>,
    ) -> GroupScope<'_> {
        self.open_scope(title.into(), Some(stage))
    }

    fn open_scope(&mut self, title: String, stage: Option<StageKind>) -> GroupScope<'_> {
        let path = self.path.join(&title);
        GroupScope {
            parent: &mut self.items,
            child: Self {
                title,
                path,
                stage,
                items: Vec::new(),
            },
        }
    }

    /// Lets `kinds` contribute their instructions to this collector, in
    /// order, each under its own stage group.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Unregistered`] when a kind has no constructor.
    pub fn collect_from_stages(
        &mut self,
        registry: &StageRegistry,
        context: &StageContext,
        kinds: &[StageKind],
    ) -> Result<(), StageError> {
        for kind in kinds {
            let stage = registry.create(*kind, context)?;
            let mut scope = self.collect_stage_group(*kind, kind.description());
            stage.add_instructions_to(&mut scope)?;
        }
        Ok(())
    }

    /// Returns the direct leaf instructions collected so far.
    #[must_use]
    pub fn retrieve_collected_instructions(&self) -> Vec<&Instruction> {
        self.items
            .iter()
            .filter_map(|item| match item {
                GroupItem::Instruction(instruction) => Some(instruction),
                GroupItem::Group(_) => None,
            })
            .collect()
    }

    /// Finishes collection and returns the immutable group.
    #[must_use]
    pub fn into_group(self) -> InstructionGroup {
        InstructionGroup::new(self.title, self.stage, self.items)
    }
}

/// Scoped child collector returned by [`InstructionCollector::collect_group`].
#[derive(Debug)]
pub struct GroupScope<'a> {
    parent: &'a mut Vec<GroupItem>,
    child: InstructionCollector,
}

impl Deref for GroupScope<'_> {
    type Target = InstructionCollector;

    fn deref(&self) -> &Self::Target {
        &self.child
    }
}

impl DerefMut for GroupScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.child
    }
}

impl Drop for GroupScope<'_> {
    fn drop(&mut self) {
        let child = std::mem::take(&mut self.child);
        self.parent.push(GroupItem::Group(child.into_group()));
    }
}
