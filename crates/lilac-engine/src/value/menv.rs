//! Meta-environments and the reflective tower.
//!
//! A meta-environment bundles a binding environment, an optional parent
//! level, and the five handler slots that define how each syntactic shape is
//! evaluated. Replacing a slot with `set-meta!` reinterprets that shape for
//! everything evaluated under this level; `EM` evaluates one level up,
//! creating the parent lazily on first use. The tower is conceptually
//! infinite but only ever materialises levels that a surfaced `EM` reached.

use super::arena::{EnvId, MEnvId, ValueId};

/// The five handler slots of a meta-environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerSlot {
    /// Function application
    App,
    /// `let` / `letrec`
    Let,
    /// `if`
    If,
    /// Self-evaluating literals
    Lit,
    /// Variable reference
    Var,
}

impl HandlerSlot {
    /// Parse a `set-meta!` key. Unknown keys fall through to plain
    /// environment rebinding.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "app" => Some(HandlerSlot::App),
            "let" => Some(HandlerSlot::Let),
            "if" => Some(HandlerSlot::If),
            "lit" => Some(HandlerSlot::Lit),
            "var" => Some(HandlerSlot::Var),
            _ => None,
        }
    }

    /// Slot name as written in `set-meta!`.
    pub fn name(self) -> &'static str {
        match self {
            HandlerSlot::App => "app",
            HandlerSlot::Let => "let",
            HandlerSlot::If => "if",
            HandlerSlot::Lit => "lit",
            HandlerSlot::Var => "var",
        }
    }
}

/// Identity of a built-in handler implementation.
///
/// The evaluator dispatches on this enum instead of through function
/// pointers, so a slot table is just data and can be copied into the fresh
/// meta-environment a call creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHandler {
    /// Default application: evaluate operator and operands left to right
    App,
    /// Default staged `let`
    Let,
    /// Default staged `if`
    If,
    /// Identity on literals
    Lit,
    /// Environment lookup
    Var,
}

/// A handler slot entry: a built-in identity or a user lambda installed by
/// `set-meta!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// One of the built-in behaviours
    Builtin(BuiltinHandler),
    /// A user closure; receives the quoted form and its result is the
    /// evaluation result
    User(ValueId),
}

/// The slot table of one tower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerTable {
    pub app: Handler,
    pub let_: Handler,
    pub if_: Handler,
    pub lit: Handler,
    pub var: Handler,
}

impl HandlerTable {
    /// The default table: every slot bound to its built-in behaviour.
    pub fn builtin() -> Self {
        Self {
            app: Handler::Builtin(BuiltinHandler::App),
            let_: Handler::Builtin(BuiltinHandler::Let),
            if_: Handler::Builtin(BuiltinHandler::If),
            lit: Handler::Builtin(BuiltinHandler::Lit),
            var: Handler::Builtin(BuiltinHandler::Var),
        }
    }

    /// Read a slot.
    pub fn get(&self, slot: HandlerSlot) -> Handler {
        match slot {
            HandlerSlot::App => self.app,
            HandlerSlot::Let => self.let_,
            HandlerSlot::If => self.if_,
            HandlerSlot::Lit => self.lit,
            HandlerSlot::Var => self.var,
        }
    }

    /// Replace a slot.
    pub fn set(&mut self, slot: HandlerSlot, handler: Handler) {
        match slot {
            HandlerSlot::App => self.app = handler,
            HandlerSlot::Let => self.let_ = handler,
            HandlerSlot::If => self.if_ = handler,
            HandlerSlot::Lit => self.lit = handler,
            HandlerSlot::Var => self.var = handler,
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One level of the reflective tower.
#[derive(Debug, Clone)]
pub struct MEnvData {
    /// Binding environment of this level
    pub env: Option<EnvId>,
    /// Next-meta-level, created lazily on the first `EM`
    pub parent: Option<MEnvId>,
    /// Handler slots
    pub handlers: HandlerTable,
}

impl MEnvData {
    /// A fresh level with default handlers and the given bindings.
    pub fn new(env: Option<EnvId>) -> Self {
        Self {
            env,
            parent: None,
            handlers: HandlerTable::builtin(),
        }
    }

    /// The level a call creates: inherits the handler slots only.
    /// Handlers are dynamically scoped; bindings are lexically scoped.
    pub fn for_call(env: Option<EnvId>, handlers: HandlerTable) -> Self {
        Self {
            env,
            parent: None,
            handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names_round_trip() {
        for slot in [
            HandlerSlot::App,
            HandlerSlot::Let,
            HandlerSlot::If,
            HandlerSlot::Lit,
            HandlerSlot::Var,
        ] {
            assert_eq!(HandlerSlot::from_name(slot.name()), Some(slot));
        }
        assert_eq!(HandlerSlot::from_name("add"), None);
    }

    #[test]
    fn test_set_replaces_one_slot() {
        let mut table = HandlerTable::builtin();
        table.set(HandlerSlot::If, Handler::User(ValueId::NIL));

        assert_eq!(table.get(HandlerSlot::If), Handler::User(ValueId::NIL));
        assert_eq!(
            table.get(HandlerSlot::App),
            Handler::Builtin(BuiltinHandler::App)
        );
    }
}
