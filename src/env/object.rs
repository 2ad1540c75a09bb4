use std::fmt;

use strum_macros::Display;

use crate::util::{Address, ObjectReference};
use crate::vm::{RemoteRef, Value};

/// The heap an environment works on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum Mode {
    /// The compiler runs in the host VM's own heap and objects are accessed directly.
    #[strum(serialize = "host")]
    Host,
    /// The compiler runs in a separate heap, reached through JNI-style calls.
    #[strum(serialize = "remote")]
    Remote,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
enum ObjectRepr {
    Host(ObjectReference),
    Remote(RemoteRef),
}

/// A non-null reference to a compiler-side object, tagged with the heap it lives in. Null is
/// `Option::<JVMCIObject>::None`.
///
/// A remote object is a local reference and is only valid until the environment that created it
/// is dropped. Use [`JVMCIHandle`] to keep a reference longer.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct JVMCIObject(ObjectRepr);

impl JVMCIObject {
    pub fn from_host(object: ObjectReference) -> Self {
        JVMCIObject(ObjectRepr::Host(object))
    }

    pub fn from_remote(object: RemoteRef) -> Self {
        JVMCIObject(ObjectRepr::Remote(object))
    }

    pub fn mode(&self) -> Mode {
        match self.0 {
            ObjectRepr::Host(_) => Mode::Host,
            ObjectRepr::Remote(_) => Mode::Remote,
        }
    }

    pub fn as_host(&self) -> Option<ObjectReference> {
        match self.0 {
            ObjectRepr::Host(o) => Some(o),
            ObjectRepr::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<RemoteRef> {
        match self.0 {
            ObjectRepr::Remote(r) => Some(r),
            ObjectRepr::Host(_) => None,
        }
    }
}

impl fmt::Debug for JVMCIObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            ObjectRepr::Host(o) => write!(f, "host:{}", o),
            ObjectRepr::Remote(r) => write!(f, "remote:{:?}", r),
        }
    }
}

/// An array of references.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct JVMCIObjectArray(pub JVMCIObject);

/// An array of primitive elements.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct JVMCIPrimitiveArray(pub JVMCIObject);

impl From<JVMCIObjectArray> for JVMCIObject {
    fn from(array: JVMCIObjectArray) -> JVMCIObject {
        array.0
    }
}

impl From<JVMCIPrimitiveArray> for JVMCIObject {
    fn from(array: JVMCIPrimitiveArray) -> JVMCIObject {
        array.0
    }
}

/// A value as seen by environment operations.
pub type JVMCIValue = Value<Option<JVMCIObject>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandleStrength {
    Global,
    Weak,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum HandleRepr {
    /// A global or weak handle of the host VM.
    Host(Address),
    /// A global or weak global JNI reference.
    Remote(RemoteRef),
}

/// A reference that outlives the environment that created it. It must be destroyed explicitly
/// with [`crate::env::JVMCIEnv::destroy_handle`], in an environment of the same mode.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct JVMCIHandle {
    repr: HandleRepr,
    strength: HandleStrength,
}

impl JVMCIHandle {
    pub(crate) fn host(handle: Address, strength: HandleStrength) -> Self {
        JVMCIHandle {
            repr: HandleRepr::Host(handle),
            strength,
        }
    }

    pub(crate) fn remote(reference: RemoteRef, strength: HandleStrength) -> Self {
        JVMCIHandle {
            repr: HandleRepr::Remote(reference),
            strength,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.repr {
            HandleRepr::Host(_) => Mode::Host,
            HandleRepr::Remote(_) => Mode::Remote,
        }
    }

    pub fn strength(&self) -> HandleStrength {
        self.strength
    }

    pub fn is_weak(&self) -> bool {
        self.strength == HandleStrength::Weak
    }

    /// The handle as the compiler side stores it in a `long`.
    pub fn as_jlong(&self) -> i64 {
        match self.repr {
            HandleRepr::Host(a) => a.as_jlong(),
            HandleRepr::Remote(r) => r.as_raw() as i64,
        }
    }

    /// # Safety
    /// `raw` must come from [`JVMCIHandle::as_jlong`] of a live handle of the given mode and strength.
    pub unsafe fn from_jlong(mode: Mode, raw: i64, strength: HandleStrength) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        let repr = match mode {
            Mode::Host => HandleRepr::Host(Address::from_jlong(raw)),
            Mode::Remote => HandleRepr::Remote(RemoteRef::from_raw(raw as usize)?),
        };
        Some(JVMCIHandle { repr, strength })
    }

    pub(crate) fn host_address(&self) -> Option<Address> {
        match self.repr {
            HandleRepr::Host(a) => Some(a),
            HandleRepr::Remote(_) => None,
        }
    }

    pub(crate) fn remote_ref(&self) -> Option<RemoteRef> {
        match self.repr {
            HandleRepr::Remote(r) => Some(r),
            HandleRepr::Host(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_of_references() {
        let host = JVMCIObject::from_host(ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000) }).unwrap());
        let remote = JVMCIObject::from_remote(RemoteRef::from_raw(8).unwrap());
        assert_eq!(host.mode(), Mode::Host);
        assert_eq!(remote.mode(), Mode::Remote);
        assert!(host.as_remote().is_none());
        assert!(remote.as_host().is_none());
        assert_ne!(host, remote);
    }

    #[test]
    fn handle_mode() {
        let h = JVMCIHandle::remote(RemoteRef::from_raw(16).unwrap(), HandleStrength::Weak);
        assert_eq!(h.mode(), Mode::Remote);
        assert!(h.is_weak());
        assert_eq!(h.host_address(), None);
    }
}
