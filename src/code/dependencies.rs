//! Assumptions compiled code relies on, in the form the VM checks them.

use std::fmt;

use crate::util::ObjectReference;
use crate::vm::{KlassRef, MethodRef, VMBinding};

/// One assumption about the class hierarchy or the runtime state. If it stops holding, code that
/// depends on it must not run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// No subclass of `context` (including itself) has a finalizer.
    NoFinalizableSubclasses { context: KlassRef },
    /// `context` has no subclasses.
    LeafType { context: KlassRef },
    /// `subtype` is the only concrete subtype of the abstract `context`.
    ConcreteSubtype { context: KlassRef, subtype: KlassRef },
    /// `method` is the only implementation of itself in the hierarchy below `context`.
    UniqueConcreteMethod { context: KlassRef, method: MethodRef },
    /// The method is not redefined. Recorded for every inlined method while breakpoints or
    /// hotswapping may be used.
    EvolMethod { method: MethodRef },
    /// The target of a mutable call site does not change.
    CallSiteTargetValue {
        call_site: ObjectReference,
        method_handle: ObjectReference,
    },
}

impl Dependency {
    /// Can only the loading of a class break this dependency?
    pub fn is_klass_type(&self) -> bool {
        !matches!(
            self,
            Dependency::EvolMethod { .. } | Dependency::CallSiteTargetValue { .. }
        )
    }

    /// The class at the root of the hierarchy the dependency is about.
    pub fn context(&self) -> Option<KlassRef> {
        match *self {
            Dependency::NoFinalizableSubclasses { context }
            | Dependency::LeafType { context }
            | Dependency::ConcreteSubtype { context, .. }
            | Dependency::UniqueConcreteMethod { context, .. } => Some(context),
            Dependency::EvolMethod { .. } | Dependency::CallSiteTargetValue { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dependency::NoFinalizableSubclasses { .. } => "no_finalizable_subclasses",
            Dependency::LeafType { .. } => "leaf_type",
            Dependency::ConcreteSubtype { .. } => "abstract_with_unique_concrete_subtype",
            Dependency::UniqueConcreteMethod { .. } => "unique_concrete_method",
            Dependency::EvolMethod { .. } => "evol_method",
            Dependency::CallSiteTargetValue { .. } => "call_site_target_value",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dependency::NoFinalizableSubclasses { context } | Dependency::LeafType { context } => {
                write!(f, "{}({:?})", self.name(), context)
            }
            Dependency::ConcreteSubtype { context, subtype } => {
                write!(f, "{}({:?}, {:?})", self.name(), context, subtype)
            }
            Dependency::UniqueConcreteMethod { context, method } => {
                write!(f, "{}({:?}, {:?})", self.name(), context, method)
            }
            Dependency::EvolMethod { method } => write!(f, "{}({:?})", self.name(), method),
            Dependency::CallSiteTargetValue {
                call_site,
                method_handle,
            } => write!(f, "{}({}, {})", self.name(), call_site, method_handle),
        }
    }
}

/// A dependency that does not hold anymore.
#[derive(Clone, Debug, PartialEq)]
pub struct DependencyFailure {
    pub dependency: Dependency,
    /// The class whose loading broke the dependency, if there is one.
    pub witness: Option<KlassRef>,
    pub detail: String,
}

/// The dependencies of one piece of compiled code, without duplicates and in the order they were
/// first asserted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dependencies {
    deps: Vec<Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency. Returns false if it was already recorded.
    pub fn add(&mut self, dependency: Dependency) -> bool {
        if self.deps.contains(&dependency) {
            return false;
        }
        self.deps.push(dependency);
        true
    }

    pub fn assert_has_no_finalizable_subclasses(&mut self, context: KlassRef) {
        self.add(Dependency::NoFinalizableSubclasses { context });
    }

    pub fn assert_leaf_type(&mut self, context: KlassRef) {
        self.add(Dependency::LeafType { context });
    }

    /// A class that is its own unique concrete subtype is a leaf.
    pub fn assert_abstract_with_unique_concrete_subtype(&mut self, context: KlassRef, subtype: KlassRef) {
        if context == subtype {
            self.assert_leaf_type(context);
        } else {
            self.add(Dependency::ConcreteSubtype { context, subtype });
        }
    }

    pub fn assert_unique_concrete_method(&mut self, context: KlassRef, method: MethodRef) {
        self.add(Dependency::UniqueConcreteMethod { context, method });
    }

    pub fn assert_evol_method(&mut self, method: MethodRef) {
        self.add(Dependency::EvolMethod { method });
    }

    pub fn assert_call_site_target_value(&mut self, call_site: ObjectReference, method_handle: ObjectReference) {
        self.add(Dependency::CallSiteTargetValue {
            call_site,
            method_handle,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.iter()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Check the dependencies against the current state of the VM and return the first one that
    /// fails. Class hierarchy dependencies can only fail if a class was loaded, so unless
    /// `counter_changed` is set they are only checked by debug builds.
    pub fn validate<VM: VMBinding>(&self, counter_changed: bool) -> Option<DependencyFailure> {
        let check_klass_types = counter_changed || VM::IS_DEBUG_BUILD;
        for dependency in self.deps.iter() {
            if dependency.is_klass_type() && !check_klass_types {
                continue;
            }
            if let Some(witness) = VM::check_dependency(dependency) {
                let detail = format!(
                    "{} dependency failed: {} (witness {})",
                    dependency.name(),
                    dependency,
                    VM::klass_name(witness)
                );
                debug!("{}", detail);
                return Some(DependencyFailure {
                    dependency: *dependency,
                    witness: Some(witness),
                    detail,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    fn klass(raw: usize) -> KlassRef {
        KlassRef(unsafe { Address::from_usize(raw) })
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut deps = Dependencies::new();
        deps.assert_leaf_type(klass(0x100));
        deps.assert_leaf_type(klass(0x100));
        deps.assert_has_no_finalizable_subclasses(klass(0x100));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn own_unique_subtype_is_leaf() {
        let mut deps = Dependencies::new();
        deps.assert_abstract_with_unique_concrete_subtype(klass(0x100), klass(0x100));
        deps.assert_abstract_with_unique_concrete_subtype(klass(0x100), klass(0x200));
        let all: Vec<_> = deps.iter().copied().collect();
        assert_eq!(
            all,
            vec![
                Dependency::LeafType { context: klass(0x100) },
                Dependency::ConcreteSubtype {
                    context: klass(0x100),
                    subtype: klass(0x200)
                },
            ]
        );
    }

    #[test]
    fn klass_types() {
        assert!(Dependency::LeafType { context: klass(0x100) }.is_klass_type());
        let method = MethodRef(unsafe { Address::from_usize(0x300) });
        assert!(!Dependency::EvolMethod { method }.is_klass_type());
        assert_eq!(Dependency::EvolMethod { method }.context(), None);
    }
}
