//! Value types describing single remote actions and the tree that groups
//! them.
//!
//! An [`Instruction`] is one shell command, HTTP call, or signal wait. Each
//! instruction belongs to exactly one [`InstructionGroup`]; groups nest to
//! give progress output structure ("Clearing old files" → "Deploying
//! containers" → "Opening firewall"). Trees are built once through an
//! [`InstructionCollector`] and are immutable afterwards.

use std::fmt;

use crate::stage::StageKind;

mod collector;

pub use collector::{GroupScope, InstructionCollector};

/// Whether a failed instruction may be attempted again.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RetryPolicy {
    /// The first failure is terminal.
    #[default]
    NoRetry,
    /// Retryable failures are attempted again up to the configured bound.
    AllowRetries,
}

/// Discriminator for [`InstructionAction`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstructionType {
    /// A command run over the control channel.
    ShellCommand,
    /// A request issued by the orchestrator.
    HttpCall,
    /// A pause until the remote side calls back.
    SignalWait,
}

/// HTTP verbs supported by [`HttpCall`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpVerb {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl HttpVerb {
    /// Returns the canonical upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// An HTTP request issued by the orchestrator on behalf of a stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpCall {
    /// Request method.
    pub verb: HttpVerb,
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs in send order.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<String>,
}

/// The remote action an instruction performs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstructionAction {
    /// Run the command text on the target machine.
    ShellCommand(String),
    /// Issue an HTTP call.
    HttpCall(HttpCall),
    /// Wait until the named signal is observed.
    SignalWait(String),
}

/// Path of group titles from the blueprint root to an instruction's owner.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GroupPath(Vec<String>);

impl GroupPath {
    /// Returns a new path extended by `title`.
    #[must_use]
    pub fn join(&self, title: &str) -> Self {
        let mut titles = self.0.clone();
        titles.push(title.to_owned());
        Self(titles)
    }

    /// Returns the title of the innermost group, if any.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns every title from the root downwards.
    #[must_use]
    pub fn titles(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0.join(" > "))
    }
}

/// A single remote action plus its retry policy and owning group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    action: InstructionAction,
    retry_policy: RetryPolicy,
    group: GroupPath,
}

impl Instruction {
    /// Creates a shell command instruction that is not retried.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::from_action(InstructionAction::ShellCommand(command.into()))
    }

    /// Creates an HTTP call instruction that is not retried.
    #[must_use]
    pub fn http(call: HttpCall) -> Self {
        Self::from_action(InstructionAction::HttpCall(call))
    }

    /// Creates a signal wait for `name`.
    pub fn signal(name: impl Into<String>) -> Self {
        Self::from_action(InstructionAction::SignalWait(name.into()))
    }

    const fn from_action(action: InstructionAction) -> Self {
        Self {
            action,
            retry_policy: RetryPolicy::NoRetry,
            group: GroupPath(Vec::new()),
        }
    }

    /// Marks the instruction as safe to retry.
    #[must_use]
    pub fn allow_retries(self) -> Self {
        self.with_retry_policy(RetryPolicy::AllowRetries)
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub(crate) fn in_group(mut self, group: GroupPath) -> Self {
        self.group = group;
        self
    }

    /// Returns the discriminator.
    #[must_use]
    pub const fn instruction_type(&self) -> InstructionType {
        match self.action {
            InstructionAction::ShellCommand(_) => InstructionType::ShellCommand,
            InstructionAction::HttpCall(_) => InstructionType::HttpCall,
            InstructionAction::SignalWait(_) => InstructionType::SignalWait,
        }
    }

    /// Returns the action payload.
    #[must_use]
    pub const fn action(&self) -> &InstructionAction {
        &self.action
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns the owning group path.
    #[must_use]
    pub const fn group(&self) -> &GroupPath {
        &self.group
    }
}

/// Either a leaf instruction or a nested group, in collection order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GroupItem {
    /// A leaf action.
    Instruction(Instruction),
    /// A titled child group.
    Group(InstructionGroup),
}

/// A titled node in the instruction tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstructionGroup {
    title: String,
    stage: Option<StageKind>,
    items: Vec<GroupItem>,
}

impl InstructionGroup {
    pub(crate) const fn new(title: String, stage: Option<StageKind>, items: Vec<GroupItem>) -> Self {
        Self {
            title,
            stage,
            items,
        }
    }

    /// Returns the group title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the stage that contributed this group, for top-level stage
    /// groups.
    #[must_use]
    pub const fn stage(&self) -> Option<StageKind> {
        self.stage
    }

    /// Returns leaves and child groups in collection order.
    #[must_use]
    pub fn items(&self) -> &[GroupItem] {
        &self.items
    }

    /// Iterates the direct leaf instructions.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            GroupItem::Instruction(instruction) => Some(instruction),
            GroupItem::Group(_) => None,
        })
    }

    /// Iterates the direct child groups.
    pub fn groups(&self) -> impl Iterator<Item = &InstructionGroup> {
        self.items.iter().filter_map(|item| match item {
            GroupItem::Group(group) => Some(group),
            GroupItem::Instruction(_) => None,
        })
    }

    /// Returns every instruction beneath this group in execution order.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Instruction> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a Instruction>) {
        for item in &self.items {
            match item {
                GroupItem::Instruction(instruction) => out.push(instruction),
                GroupItem::Group(group) => group.flatten_into(out),
            }
        }
    }

    /// Finds the direct child group contributed by `stage`.
    #[must_use]
    pub fn stage_group(&self, stage: StageKind) -> Option<&InstructionGroup> {
        self.groups().find(|group| group.stage == Some(stage))
    }
}
