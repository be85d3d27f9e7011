//! Who is executing a command and when.

use std::borrow::Cow;
use std::fmt;
use chrono::{DateTime, Utc};


//------------ Actor ---------------------------------------------------------

/// The principal on whose behalf a command is executed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Actor {
    name: Cow<'static, str>,
    is_user: bool,
}

impl Actor {
    /// Creates a built-in system actor.
    pub const fn system(name: &'static str) -> Self {
        Actor { name: Cow::Borrowed(name), is_user: false }
    }

    /// Creates a built-in user actor.
    pub const fn user(name: &'static str) -> Self {
        Actor { name: Cow::Borrowed(name), is_user: true }
    }

    /// Creates an actor for an interactive user.
    pub fn user_named(name: impl Into<String>) -> Self {
        Actor { name: Cow::Owned(name.into()), is_user: true }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


//------------ CommandContext ------------------------------------------------

/// The context a command is executed in.
///
/// This is passed explicitly through the dispatcher to every handler. All
/// time based decisions use its time rather than the system clock.
#[derive(Clone, Debug)]
pub struct CommandContext {
    actor: Actor,
    now: DateTime<Utc>,
}

impl CommandContext {
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        CommandContext { actor, now }
    }

    /// Creates a context for the given actor at the current time.
    pub fn now(actor: Actor) -> Self {
        Self::new(actor, Utc::now())
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.now
    }
}
