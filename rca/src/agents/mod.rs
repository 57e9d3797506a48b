//! Actor runtime and the roles that run on it.
//!
//! Every role owns a FIFO mailbox. [`Runtime::run_until_idle`] dispatches one
//! message at a time, in send order, and delivers a handler's outbound
//! messages only after the handler returns. Roles therefore never observe
//! each other mid-computation and no locking is needed.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, trace};

use crate::core::blackboard::Blackboard;
use crate::core::budget::remaining_budget;
use crate::core::cancel::CancellationToken;
use crate::core::history::Conversation;
use crate::core::types::{Artifact, Message, UsageLedger};

pub mod assistant;
pub mod gate;
pub mod generator;

/// A named participant that reacts to messages.
pub trait Role {
    fn name(&self) -> &str;

    /// Process one message to completion.
    fn handle(&mut self, message: Message, ctx: &mut RoleContext<'_>) -> Result<()>;

    /// The role's model transcript, for roles that keep one.
    fn transcript(&self) -> Option<&Conversation> {
        None
    }

    /// Called before `origin` is handed a new task.
    fn task_started(&mut self, _origin: &str) {}
}

/// Session state a handler may read or mutate while it runs.
pub struct RoleContext<'a> {
    pub blackboard: &'a mut Blackboard,
    pub usage: &'a mut UsageLedger,
    pub cancel: &'a CancellationToken,
    pub deadline: Instant,
    artifact: &'a mut Option<Artifact>,
    sender: &'a str,
    outbox: Vec<Message>,
}

impl RoleContext<'_> {
    /// Queue a message; it is delivered after the current handler returns.
    pub fn send(&mut self, recipient: &str, content: impl Into<String>) {
        self.outbox
            .push(Message::new(self.sender, recipient, content.into()));
    }

    /// Replace the accepted artifact slot.
    pub fn store_artifact(&mut self, artifact: Artifact) {
        *self.artifact = Some(artifact);
    }
}

/// Session-scoped registry of roles plus their mailboxes.
pub struct Runtime {
    roles: BTreeMap<String, Box<dyn Role>>,
    mailboxes: BTreeMap<String, VecDeque<Message>>,
    /// Recipient of every pending message, in send order.
    ready: VecDeque<String>,
    blackboard: Blackboard,
    usage: UsageLedger,
    artifact: Option<Artifact>,
    cancel: CancellationToken,
}

impl Runtime {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            roles: BTreeMap::new(),
            mailboxes: BTreeMap::new(),
            ready: VecDeque::new(),
            blackboard: Blackboard::new(),
            usage: UsageLedger::default(),
            artifact: None,
            cancel,
        }
    }

    pub fn register(&mut self, role: Box<dyn Role>) -> Result<()> {
        let name = role.name().to_string();
        if self.roles.contains_key(&name) {
            bail!("role {name} is already registered");
        }
        debug!(role = %name, "registered role");
        self.mailboxes.insert(name.clone(), VecDeque::new());
        self.roles.insert(name, role);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn send(&mut self, message: Message) -> Result<()> {
        let Some(mailbox) = self.mailboxes.get_mut(&message.recipient) else {
            bail!(
                "unknown recipient {} (sent by {})",
                message.recipient,
                message.sender
            );
        };
        trace!(from = %message.sender, to = %message.recipient, "queued message");
        self.ready.push_back(message.recipient.clone());
        mailbox.push_back(message);
        Ok(())
    }

    /// Tell every role that `origin` is about to receive a new task.
    pub fn begin_task(&mut self, origin: &str) {
        trace!(origin, "task started");
        for role in self.roles.values_mut() {
            role.task_started(origin);
        }
    }

    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Drop every queued message, e.g. after a handler failed mid-exchange.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.ready.len();
        self.ready.clear();
        for mailbox in self.mailboxes.values_mut() {
            mailbox.clear();
        }
        dropped
    }

    /// Dispatch queued messages until every mailbox is empty.
    ///
    /// Returns the number of messages handled. A handler error stops the
    /// loop and leaves the remaining messages queued.
    #[instrument(skip_all, fields(pending = self.ready.len()))]
    pub fn run_until_idle(&mut self, deadline: Instant) -> Result<usize> {
        let mut handled = 0usize;
        while let Some(recipient) = self.ready.pop_front() {
            remaining_budget(deadline)?;

            let Some(message) = self
                .mailboxes
                .get_mut(&recipient)
                .and_then(VecDeque::pop_front)
            else {
                continue;
            };
            let Some(role) = self.roles.get_mut(&recipient) else {
                bail!("no role registered for mailbox {recipient}");
            };

            debug!(role = %recipient, from = %message.sender, "dispatching message");
            let mut ctx = RoleContext {
                blackboard: &mut self.blackboard,
                usage: &mut self.usage,
                cancel: &self.cancel,
                deadline,
                artifact: &mut self.artifact,
                sender: &recipient,
                outbox: Vec::new(),
            };
            role.handle(message, &mut ctx)
                .with_context(|| format!("role {recipient} failed"))?;
            let outbox = ctx.outbox;
            handled += 1;

            for outbound in outbox {
                self.send(outbound)?;
            }
        }
        debug!(handled, "runtime idle");
        Ok(handled)
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    pub fn take_artifact(&mut self) -> Option<Artifact> {
        self.artifact.take()
    }

    /// Transcripts of every role that keeps one, by role name.
    pub fn transcripts(&self) -> Vec<(String, Conversation)> {
        self.roles
            .iter()
            .filter_map(|(name, role)| role.transcript().map(|t| (name.clone(), t.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::is_deadline;
    use crate::core::types::Acceptance;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    /// Forwards each message to `next` until `hops` runs out, logging what it saw.
    struct Relay {
        name: String,
        next: String,
        hops: u32,
        seen: Rc<RefCell<Vec<String>>>,
    }

    impl Role for Relay {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle(&mut self, message: Message, ctx: &mut RoleContext<'_>) -> Result<()> {
            self.seen
                .borrow_mut()
                .push(format!("{}<-{}:{}", self.name, message.sender, message.content));
            if self.hops > 0 {
                self.hops -= 1;
                ctx.send(&self.next, message.content);
            } else {
                ctx.store_artifact(Artifact {
                    origin: self.name.clone(),
                    output: message.content,
                    code_blocks: Vec::new(),
                    acceptance: Acceptance::NoCode,
                });
            }
            Ok(())
        }
    }

    fn relay(name: &str, next: &str, hops: u32, seen: &Rc<RefCell<Vec<String>>>) -> Box<dyn Role> {
        Box::new(Relay {
            name: name.to_string(),
            next: next.to_string(),
            hops,
            seen: Rc::clone(seen),
        })
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut runtime = Runtime::new(CancellationToken::new());
        runtime.register(relay("a", "b", 0, &seen)).expect("first");
        let err = runtime.register(relay("a", "b", 0, &seen)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn unknown_recipient_is_an_error() {
        let mut runtime = Runtime::new(CancellationToken::new());
        let err = runtime.send(Message::new("x", "ghost", "hi")).unwrap_err();
        assert!(err.to_string().contains("unknown recipient ghost"));
    }

    /// Verifies messages ping-pong in send order until the roles go quiet.
    #[test]
    fn dispatches_in_order_until_idle() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut runtime = Runtime::new(CancellationToken::new());
        runtime.register(relay("a", "b", 1, &seen)).expect("a");
        runtime.register(relay("b", "a", 1, &seen)).expect("b");

        runtime.send(Message::new("test", "a", "ping")).expect("send");
        let handled = runtime.run_until_idle(deadline()).expect("run");

        assert_eq!(handled, 3);
        assert_eq!(
            *seen.borrow(),
            vec!["a<-test:ping", "b<-a:ping", "a<-b:ping"]
        );
        let artifact = runtime.take_artifact().expect("artifact");
        assert_eq!(artifact.origin, "a");
        assert!(runtime.artifact().is_none());
    }

    #[test]
    fn expired_deadline_stops_dispatch() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut runtime = Runtime::new(CancellationToken::new());
        runtime.register(relay("a", "a", 0, &seen)).expect("a");
        runtime.send(Message::new("test", "a", "late")).expect("send");

        let err = runtime.run_until_idle(Instant::now()).unwrap_err();
        assert!(is_deadline(&err));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn outbound_to_unknown_role_fails_the_run() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut runtime = Runtime::new(CancellationToken::new());
        runtime.register(relay("a", "ghost", 1, &seen)).expect("a");
        runtime.send(Message::new("test", "a", "hi")).expect("send");

        let err = runtime.run_until_idle(deadline()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown recipient ghost"));
    }
}
