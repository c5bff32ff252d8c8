//! The compiler arena.
//!
//! Dense `Vec` pools addressed by 32-bit index keys: one for values, one for
//! environment nodes, one for meta-environments. All compile-time structure
//! lives here and is freed in one shot when the arena drops. A configurable
//! node limit models the source system's OOM handling: exceeding it is
//! fatal to the compilation unit, not the process.

use super::menv::MEnvData;
use super::{Symbol, ValueData};
use crate::error::{Fallible, FatalError};

/// Index key for a value in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

impl ValueId {
    /// The unique `Nil`.
    pub const NIL: ValueId = ValueId(0);

    /// The unique `letrec` sentinel.
    pub const UNINIT: ValueId = ValueId(1);

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index key for an environment binding node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(u32);

impl EnvId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index key for a meta-environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MEnvId(u32);

impl MEnvId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One link of the cons-list environment.
#[derive(Debug, Clone)]
pub struct EnvNode {
    /// Bound name
    pub name: Symbol,
    /// Bound value; mutated in place by `letrec` back-patching and `set!`
    pub value: ValueId,
    /// Enclosing chain (`None` = end)
    pub next: Option<EnvId>,
}

/// Bump pools for every compile-time structure.
pub struct Arena {
    values: Vec<ValueData>,
    envs: Vec<EnvNode>,
    menvs: Vec<MEnvData>,
    limit: usize,
}

impl Arena {
    /// Default node limit per pool.
    pub const DEFAULT_LIMIT: usize = 1 << 22;

    /// Create an arena with the given per-pool node limit.
    ///
    /// Slots 0 and 1 of the value pool are pre-seeded with the unique `Nil`
    /// and the unique `letrec` sentinel.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            values: vec![ValueData::Nil, ValueData::Uninit],
            envs: Vec::new(),
            menvs: Vec::new(),
            limit,
        }
    }

    /// Create an arena with the default limit.
    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    // ── Values ───────────────────────────────────────────────────────

    /// Allocate a value, returning its id.
    pub fn alloc(&mut self, data: ValueData) -> Fallible<ValueId> {
        if self.values.len() >= self.limit {
            return Err(FatalError::OutOfMemory {
                arena: "value arena",
                limit: self.limit,
            });
        }
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        Ok(id)
    }

    /// Read a value.
    #[inline]
    pub fn get(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    /// Allocate an integer.
    pub fn int(&mut self, i: i64) -> Fallible<ValueId> {
        self.alloc(ValueData::Int(i))
    }

    /// Allocate a symbol reference.
    pub fn sym(&mut self, s: Symbol) -> Fallible<ValueId> {
        self.alloc(ValueData::Sym(s))
    }

    /// Allocate a pair.
    pub fn cell(&mut self, head: ValueId, tail: ValueId) -> Fallible<ValueId> {
        self.alloc(ValueData::Cell(head, tail))
    }

    /// Number of live values (including the two pre-seeded slots).
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    // ── List helpers ─────────────────────────────────────────────────

    /// Head of a pair, or `None` for anything else.
    pub fn car(&self, id: ValueId) -> Option<ValueId> {
        match self.get(id) {
            ValueData::Cell(h, _) => Some(*h),
            _ => None,
        }
    }

    /// Tail of a pair, or `None` for anything else.
    pub fn cdr(&self, id: ValueId) -> Option<ValueId> {
        match self.get(id) {
            ValueData::Cell(_, t) => Some(*t),
            _ => None,
        }
    }

    /// Collect a proper list into a vector. Returns `None` on a dotted or
    /// non-list tail.
    pub fn list_to_vec(&self, mut id: ValueId) -> Option<Vec<ValueId>> {
        let mut items = Vec::new();
        loop {
            match self.get(id) {
                ValueData::Nil => return Some(items),
                ValueData::Cell(h, t) => {
                    items.push(*h);
                    id = *t;
                }
                _ => return None,
            }
        }
    }

    /// Build a proper list from a slice of ids.
    pub fn vec_to_list(&mut self, items: &[ValueId]) -> Fallible<ValueId> {
        let mut list = ValueId::NIL;
        for &item in items.iter().rev() {
            list = self.cell(item, list)?;
        }
        Ok(list)
    }

    // ── Environment nodes ────────────────────────────────────────────

    /// Allocate an environment node.
    pub fn alloc_env(&mut self, node: EnvNode) -> Fallible<EnvId> {
        if self.envs.len() >= self.limit {
            return Err(FatalError::OutOfMemory {
                arena: "environment arena",
                limit: self.limit,
            });
        }
        let id = EnvId(self.envs.len() as u32);
        self.envs.push(node);
        Ok(id)
    }

    /// Read an environment node.
    #[inline]
    pub fn env(&self, id: EnvId) -> &EnvNode {
        &self.envs[id.index()]
    }

    /// Overwrite the value slot of a binding node (`letrec` back-patching
    /// and `set!`).
    pub fn env_set_value(&mut self, id: EnvId, value: ValueId) {
        self.envs[id.index()].value = value;
    }

    /// Number of environment nodes allocated so far.
    pub fn env_count(&self) -> usize {
        self.envs.len()
    }

    // ── Meta-environments ────────────────────────────────────────────

    /// Allocate a meta-environment.
    pub fn alloc_menv(&mut self, data: MEnvData) -> Fallible<MEnvId> {
        if self.menvs.len() >= self.limit {
            return Err(FatalError::OutOfMemory {
                arena: "meta-environment arena",
                limit: self.limit,
            });
        }
        let id = MEnvId(self.menvs.len() as u32);
        self.menvs.push(data);
        Ok(id)
    }

    /// Read a meta-environment.
    #[inline]
    pub fn menv(&self, id: MEnvId) -> &MEnvData {
        &self.menvs[id.index()]
    }

    /// Mutate a meta-environment (`set-meta!`, lazy parent creation).
    #[inline]
    pub fn menv_mut(&mut self, id: MEnvId) -> &mut MEnvData {
        &mut self.menvs[id.index()]
    }

    /// Number of meta-environments created so far.
    pub fn menv_count(&self) -> usize {
        self.menvs.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_unique() {
        let arena = Arena::new();
        assert!(matches!(arena.get(ValueId::NIL), ValueData::Nil));
        assert!(matches!(arena.get(ValueId::UNINIT), ValueData::Uninit));
    }

    #[test]
    fn test_list_round_trip() {
        let mut arena = Arena::new();
        let a = arena.int(1).unwrap();
        let b = arena.int(2).unwrap();
        let c = arena.int(3).unwrap();

        let list = arena.vec_to_list(&[a, b, c]).unwrap();
        let back = arena.list_to_vec(list).unwrap();
        assert_eq!(back, vec![a, b, c]);
    }

    #[test]
    fn test_dotted_list_rejected() {
        let mut arena = Arena::new();
        let a = arena.int(1).unwrap();
        let b = arena.int(2).unwrap();
        let dotted = arena.cell(a, b).unwrap();
        assert!(arena.list_to_vec(dotted).is_none());
    }

    #[test]
    fn test_limit_is_fatal() {
        let mut arena = Arena::with_limit(4);
        arena.int(1).unwrap();
        arena.int(2).unwrap();
        let err = arena.int(3).unwrap_err();
        assert!(matches!(err, FatalError::OutOfMemory { arena: "value arena", .. }));
    }

    #[test]
    fn test_env_set_value() {
        let mut arena = Arena::new();
        let mut interner = crate::value::Interner::new();
        let x = interner.intern("x");

        let node = arena
            .alloc_env(EnvNode {
                name: x,
                value: ValueId::UNINIT,
                next: None,
            })
            .unwrap();
        assert_eq!(arena.env(node).value, ValueId::UNINIT);

        let v = arena.int(42).unwrap();
        arena.env_set_value(node, v);
        assert_eq!(arena.env(node).value, v);
    }
}
