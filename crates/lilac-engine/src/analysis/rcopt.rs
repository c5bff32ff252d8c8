//! Reference-count operation elision.
//!
//! An alias/borrow/uniqueness table keyed on variable name, timestamped by
//! a global point counter. A fresh allocation binds a unique name;
//! assignment from another name creates an alias and downgrades the
//! original from unique; function parameters are borrowed.
//!
//! The emitter consults the table to skip `inc_ref` on borrowed names and
//! on aliases whose original still handles the count, to skip `dec_ref` on
//! borrowed names and non-final aliases, and to use `free_unique` (no RC
//! check) on names that stayed unique.

use crate::value::Symbol;
use rustc_hash::FxHashMap;

/// Per-variable RC facts.
#[derive(Debug, Clone, Default)]
pub struct RcOptInfo {
    /// Sole owner of a fresh allocation
    pub unique: bool,
    /// Non-owning (function parameter)
    pub borrowed: bool,
    /// Point at which the name was defined
    pub defined_at: u32,
    /// Point of the most recent use
    pub last_used_at: u32,
    /// Name this one aliases, if any
    pub alias_of: Option<Symbol>,
    /// Names aliasing this one
    pub aliases: Vec<Symbol>,
}

/// The table plus its point counter.
#[derive(Debug, Default)]
pub struct RcOptTable {
    vars: FxHashMap<Symbol, RcOptInfo>,
    clock: u32,
}

impl RcOptTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u32 {
        self.clock += 1;
        self.clock
    }

    /// Bind `name` to a fresh allocation: unique until aliased.
    pub fn define_fresh(&mut self, name: Symbol) {
        let at = self.tick();
        self.vars.insert(
            name,
            RcOptInfo {
                unique: true,
                defined_at: at,
                last_used_at: at,
                ..Default::default()
            },
        );
    }

    /// Bind `name` as an alias of `source`, downgrading the source.
    pub fn define_alias(&mut self, name: Symbol, source: Symbol) {
        let at = self.tick();
        if let Some(src) = self.vars.get_mut(&source) {
            src.unique = false;
            src.aliases.push(name);
        }
        self.vars.insert(
            name,
            RcOptInfo {
                unique: false,
                defined_at: at,
                last_used_at: at,
                alias_of: Some(source),
                ..Default::default()
            },
        );
    }

    /// Bind `name` as a borrowed function parameter.
    pub fn define_borrowed(&mut self, name: Symbol) {
        let at = self.tick();
        self.vars.insert(
            name,
            RcOptInfo {
                borrowed: true,
                defined_at: at,
                last_used_at: at,
                ..Default::default()
            },
        );
    }

    /// Advance the clock and record a use of `name`.
    pub fn note_use(&mut self, name: Symbol) {
        let at = self.tick();
        if let Some(info) = self.vars.get_mut(&name) {
            info.last_used_at = at;
        }
    }

    /// Facts for a name, if tracked.
    pub fn info(&self, name: Symbol) -> Option<&RcOptInfo> {
        self.vars.get(&name)
    }

    /// True if `name` is still the sole owner of its allocation.
    pub fn is_unique(&self, name: Symbol) -> bool {
        self.vars.get(&name).map(|i| i.unique).unwrap_or(false)
    }

    /// `inc_ref` can be skipped on borrowed names and on aliases whose
    /// original still handles the count.
    pub fn can_elide_inc_ref(&self, name: Symbol) -> bool {
        match self.vars.get(&name) {
            Some(info) => info.borrowed || info.alias_of.is_some(),
            None => false,
        }
    }

    /// `dec_ref` can be skipped on borrowed names and on aliases that are
    /// not the last live use of the allocation.
    pub fn can_elide_dec_ref(&self, name: Symbol) -> bool {
        let Some(info) = self.vars.get(&name) else {
            return false;
        };
        if info.borrowed {
            return true;
        }
        let Some(original) = info.alias_of else {
            return false;
        };
        // Someone else in the alias family is used later: the count is
        // still handled there.
        let family_last = self.family_last_use(original);
        family_last > info.last_used_at
    }

    fn family_last_use(&self, original: Symbol) -> u32 {
        let mut last = 0;
        if let Some(info) = self.vars.get(&original) {
            last = info.last_used_at;
            for &alias in &info.aliases {
                if let Some(alias_info) = self.vars.get(&alias) {
                    last = last.max(alias_info.last_used_at);
                }
            }
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Interner;

    fn syms(names: &[&str]) -> (Vec<Symbol>, Interner) {
        let mut interner = Interner::new();
        let list = names.iter().map(|n| interner.intern(n)).collect();
        (list, interner)
    }

    #[test]
    fn test_fresh_is_unique_until_aliased() {
        let (s, _) = syms(&["x", "y"]);
        let mut table = RcOptTable::new();

        table.define_fresh(s[0]);
        assert!(table.is_unique(s[0]));

        table.define_alias(s[1], s[0]);
        assert!(!table.is_unique(s[0]));
        assert!(!table.is_unique(s[1]));
        assert_eq!(table.info(s[1]).unwrap().alias_of, Some(s[0]));
    }

    #[test]
    fn test_borrowed_elides_both_ops() {
        let (s, _) = syms(&["p"]);
        let mut table = RcOptTable::new();
        table.define_borrowed(s[0]);

        assert!(table.can_elide_inc_ref(s[0]));
        assert!(table.can_elide_dec_ref(s[0]));
    }

    #[test]
    fn test_alias_elides_inc() {
        let (s, _) = syms(&["x", "y"]);
        let mut table = RcOptTable::new();
        table.define_fresh(s[0]);
        table.define_alias(s[1], s[0]);

        assert!(table.can_elide_inc_ref(s[1]));
        assert!(!table.can_elide_inc_ref(s[0]));
    }

    #[test]
    fn test_non_final_alias_elides_dec() {
        let (s, _) = syms(&["x", "y"]);
        let mut table = RcOptTable::new();
        table.define_fresh(s[0]);
        table.define_alias(s[1], s[0]);

        // The original is used after the alias: y's dec can be skipped.
        table.note_use(s[1]);
        table.note_use(s[0]);
        assert!(table.can_elide_dec_ref(s[1]));

        // Now y is the most recent use: its dec must stay.
        table.note_use(s[1]);
        assert!(!table.can_elide_dec_ref(s[1]));
    }

    #[test]
    fn test_unique_never_elides() {
        let (s, _) = syms(&["x"]);
        let mut table = RcOptTable::new();
        table.define_fresh(s[0]);

        assert!(!table.can_elide_inc_ref(s[0]));
        assert!(!table.can_elide_dec_ref(s[0]));
    }

    #[test]
    fn test_clock_is_monotone() {
        let (s, _) = syms(&["a", "b"]);
        let mut table = RcOptTable::new();
        table.define_fresh(s[0]);
        table.define_fresh(s[1]);
        let a = table.info(s[0]).unwrap().defined_at;
        let b = table.info(s[1]).unwrap().defined_at;
        assert!(b > a);
    }
}
