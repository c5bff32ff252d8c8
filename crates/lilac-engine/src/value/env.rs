//! Lexical environments.
//!
//! An environment is an immutable cons-list of binding nodes in the arena;
//! shadowing is by prepend and lookup is linear, which is fine for the small
//! scopes Lilac programs have. `letrec` pre-binds every name to the
//! [`ValueId::UNINIT`](super::ValueId::UNINIT) sentinel and back-patches the
//! binding node once the right-hand sides have been evaluated.

use super::arena::{Arena, EnvId, EnvNode};
use super::{Symbol, ValueId};
use crate::error::Fallible;

impl Arena {
    /// Prepend a binding, returning the new chain head.
    pub fn bind(
        &mut self,
        name: Symbol,
        value: ValueId,
        parent: Option<EnvId>,
    ) -> Fallible<EnvId> {
        self.alloc_env(EnvNode {
            name,
            value,
            next: parent,
        })
    }

    /// Find the innermost binding node for `name`, if any.
    pub fn lookup(&self, env: Option<EnvId>, name: Symbol) -> Option<EnvId> {
        let mut cursor = env;
        while let Some(id) = cursor {
            let node = self.env(id);
            if node.name == name {
                return Some(id);
            }
            cursor = node.next;
        }
        None
    }

    /// Value of the innermost binding for `name`, if any.
    pub fn lookup_value(&self, env: Option<EnvId>, name: Symbol) -> Option<ValueId> {
        self.lookup(env, name).map(|id| self.env(id).value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Interner;

    #[test]
    fn test_shadowing_by_prepend() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let x = interner.intern("x");

        let v1 = arena.int(1).unwrap();
        let v2 = arena.int(2).unwrap();

        let outer = arena.bind(x, v1, None).unwrap();
        let inner = arena.bind(x, v2, Some(outer)).unwrap();

        assert_eq!(arena.lookup_value(Some(inner), x), Some(v2));
        assert_eq!(arena.lookup_value(Some(outer), x), Some(v1));
    }

    #[test]
    fn test_lookup_walks_chain() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let y = interner.intern("y");
        let z = interner.intern("z");

        let vx = arena.int(10).unwrap();
        let vy = arena.int(20).unwrap();

        let env = arena.bind(x, vx, None).unwrap();
        let env = arena.bind(y, vy, Some(env)).unwrap();

        assert_eq!(arena.lookup_value(Some(env), x), Some(vx));
        assert_eq!(arena.lookup_value(Some(env), y), Some(vy));
        assert_eq!(arena.lookup_value(Some(env), z), None);
        assert_eq!(arena.lookup_value(None, z), None);
    }

    #[test]
    fn test_letrec_back_patch() {
        let mut arena = Arena::new();
        let mut interner = Interner::new();
        let f = interner.intern("f");

        let env = arena.bind(f, ValueId::UNINIT, None).unwrap();
        let node = arena.lookup(Some(env), f).unwrap();
        assert_eq!(arena.env(node).value, ValueId::UNINIT);

        let v = arena.int(7).unwrap();
        arena.env_set_value(node, v);
        assert_eq!(arena.lookup_value(Some(env), f), Some(v));
    }
}
