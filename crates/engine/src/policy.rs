//! Policy decision points.
//!
//! A [`PolicyChain`] is an ordered list of [`DispatchPolicy`] values
//! consulted by the controller before a workflow dispatches.  Verdicts are
//! evaluated in registration order and the first non-`Continue` verdict
//! wins.  [`MalformedEventGuard`] is always installed first.

use std::sync::Arc;

use tracing::warn;

use crate::context::DispatchContext;
use crate::receivers::Receiver;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Stop and record a `skipped` row with the reason.
    Skip(String),
    /// Stop without writing anything.
    Drop(String),
}

impl Verdict {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// A pluggable decision point.  Every method has a neutral default so
/// implementors only override what they care about.
pub trait DispatchPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the workflow may send synchronously.
    fn allow_send(&self, _ctx: &DispatchContext) -> Verdict {
        Verdict::Continue
    }

    /// Whether the workflow may schedule deferred deliveries.
    fn allow_schedule(&self, _ctx: &DispatchContext) -> Verdict {
        Verdict::Continue
    }

    /// Add, remove or reorder resolved receivers.
    fn filter_receivers(&self, _ctx: &DispatchContext, _receivers: &mut Vec<Receiver>) {}

    /// Override whether the acting user is notified about their own action.
    fn notify_actor(&self, _ctx: &DispatchContext) -> Option<bool> {
        None
    }

    /// Pick the channel for one receiver.
    fn default_channel(&self, _ctx: &DispatchContext, _receiver: &Receiver) -> Option<String> {
        None
    }
}

/// Blocks both sending and scheduling when the event argument bag is not a
/// JSON object.  Nothing is logged to the notification log.
#[derive(Debug, Default, Clone, Copy)]
pub struct MalformedEventGuard;

impl MalformedEventGuard {
    fn check(&self, ctx: &DispatchContext) -> Verdict {
        if ctx.event.has_valid_args() {
            Verdict::Continue
        } else {
            warn!(
                workflow_id = ctx.workflow.id,
                event = ctx.event.name(),
                "event arguments are not an object, dropping notification"
            );
            Verdict::Drop("malformed event arguments".into())
        }
    }
}

impl DispatchPolicy for MalformedEventGuard {
    fn name(&self) -> &str {
        "malformed_event_guard"
    }

    fn allow_send(&self, ctx: &DispatchContext) -> Verdict {
        self.check(ctx)
    }

    fn allow_schedule(&self, ctx: &DispatchContext) -> Verdict {
        self.check(ctx)
    }
}

pub struct PolicyChain {
    policies: Vec<Arc<dyn DispatchPolicy>>,
}

impl Default for PolicyChain {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyChain {
    /// A chain holding only the built-in guard.
    pub fn new() -> Self {
        Self { policies: vec![Arc::new(MalformedEventGuard)] }
    }

    pub fn push(&mut self, policy: Arc<dyn DispatchPolicy>) {
        self.policies.push(policy);
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn allow_send(&self, ctx: &DispatchContext) -> Verdict {
        self.first_verdict(|p| p.allow_send(ctx))
    }

    pub fn allow_schedule(&self, ctx: &DispatchContext) -> Verdict {
        self.first_verdict(|p| p.allow_schedule(ctx))
    }

    pub fn filter_receivers(&self, ctx: &DispatchContext, receivers: &mut Vec<Receiver>) {
        for policy in &self.policies {
            policy.filter_receivers(ctx, receivers);
        }
    }

    pub fn notify_actor(&self, ctx: &DispatchContext) -> Option<bool> {
        self.policies.iter().find_map(|p| p.notify_actor(ctx))
    }

    pub fn default_channel(&self, ctx: &DispatchContext, receiver: &Receiver) -> Option<String> {
        self.policies.iter().find_map(|p| p.default_channel(ctx, receiver))
    }

    fn first_verdict(&self, mut check: impl FnMut(&dyn DispatchPolicy) -> Verdict) -> Verdict {
        for policy in &self.policies {
            let verdict = check(policy.as_ref());
            if !verdict.is_continue() {
                return verdict;
            }
        }
        Verdict::Continue
    }
}
