use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

/// A raw location in the host VM: a code cache pc, a metadata pointer, a handle cell or a
/// runtime entry point. Loads and stores through an `Address` are unsafe.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit, Default)]
pub struct Address(usize);

impl Add<usize> for Address {
    type Output = Address;
    fn add(self, offset: usize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<usize> for Address {
    fn add_assign(&mut self, offset: usize) {
        self.0 += offset;
    }
}

impl Sub<usize> for Address {
    type Output = Address;
    fn sub(self, offset: usize) -> Address {
        Address(self.0 - offset)
    }
}

/// The distance from `other` up to `self`.
impl Sub<Address> for Address {
    type Output = usize;
    fn sub(self, other: Address) -> usize {
        debug_assert!(self.0 >= other.0, "{} is below {}", self, other);
        self.0 - other.0
    }
}

impl Address {
    pub const ZERO: Self = Address(0);

    pub fn from_ref<T>(r: &T) -> Address {
        Address(r as *const T as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// # Safety
    /// The value must come from the VM (a pc, a metadata pointer, an entry point) or be a
    /// hard-coded address in a test. Nothing checks that it can be dereferenced.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// The value the compiler side reads from and writes to `long` fields such as
    /// `InstalledCode.address`.
    pub const fn as_jlong(self) -> i64 {
        self.0 as i64
    }

    /// # Safety
    /// Same as [`Address::from_usize`].
    pub const unsafe fn from_jlong(raw: i64) -> Address {
        Address(raw as usize)
    }

    /// # Safety
    /// The address must point at a readable, initialized `T`.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *const T)
    }

    /// Writes without dropping whatever was there.
    ///
    /// # Safety
    /// The address must point at writable memory large enough for a `T`.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn align_up(self, align: usize) -> Address {
        Address(raw_align_up(self.0, align))
    }

    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Round `val` up to a power-of-two `align`.
pub const fn raw_align_up(val: usize, align: usize) -> usize {
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A direct reference to an object in the host heap. Only valid for the duration of a host-mode
/// operation; anything that has to survive a safepoint is kept in a VM handle instead (see
/// [`crate::vm::VMBinding::new_local_handle`]).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    pub fn to_raw_address(self) -> Address {
        Address(self.0)
    }

    /// `None` for a null oop.
    pub fn from_raw_address(addr: Address) -> Option<ObjectReference> {
        if addr.is_zero() {
            None
        } else {
            Some(ObjectReference(addr.0))
        }
    }

    pub fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_alignment() {
        let pc = unsafe { Address::from_usize(0x1011) };
        assert_eq!(pc.align_up(16), unsafe { Address::from_usize(0x1020) });
        assert_eq!(pc.align_up(1), pc);
        assert_eq!(raw_align_up(0x40, 0x20), 0x40);
    }

    #[test]
    fn addresses_in_long_fields() {
        let entry = unsafe { Address::from_usize(0x7f00_dead_0000) };
        assert_eq!(unsafe { Address::from_jlong(entry.as_jlong()) }, entry);
        assert_eq!(Address::ZERO.as_jlong(), 0);
    }

    #[test]
    fn null_oops() {
        assert_eq!(ObjectReference::from_raw_address(Address::ZERO), None);
        let oop = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x2000) }).unwrap();
        assert_eq!(oop.to_string(), "0x2000");
    }
}
