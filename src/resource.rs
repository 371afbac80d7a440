//! Exclusive allocation of hardware resources.
//!
//! A resource key names one unit inside a group, e.g. a pin inside a GPIO port
//! or a whole peripheral that forms a group of its own. The registry keeps one
//! allocation bitmask per group and switches the group clock on when the first
//! unit is allocated and off again when the last one is released.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

use critical_section::Mutex;

use crate::diag::{Diagnostics, Error, trace};

/// Key identifying one allocatable unit.
pub trait Resource: Copy + Eq + fmt::Debug {
    /// Index of the group sharing a clock gate.
    fn group(&self) -> usize;
    /// Bit of the unit inside its group.
    fn mask(&self) -> u32;
}

/// Group enable/disable callback.
pub trait GroupClock {
    fn set_group_clock(&self, group: usize, enabled: bool);
}

impl GroupClock for () {
    fn set_group_clock(&self, _group: usize, _enabled: bool) {}
}

/// Allocation tracker for `N` groups of resources of type `R`.
///
/// `C` is the hardware driver which gets the group clock callbacks. It is also
/// reachable through [`ResourceRegistry::control`] so peripheral adapters can
/// drive the hardware behind the resources they hold.
pub struct ResourceRegistry<'d, R, C, const N: usize> {
    name: &'static str,
    groups: Mutex<Cell<[u32; N]>>,
    control: C,
    diag: &'d Diagnostics,
    _key: PhantomData<fn(R)>,
}

impl<'d, R: Resource, C: GroupClock, const N: usize> ResourceRegistry<'d, R, C, N> {
    /// Create a registry with nothing allocated. `name` prefixes error reports.
    pub const fn new(name: &'static str, control: C, diag: &'d Diagnostics) -> Self {
        Self {
            name,
            groups: Mutex::new(Cell::new([0; N])),
            control,
            diag,
            _key: PhantomData,
        }
    }

    /// Grant exclusive ownership of `key`.
    ///
    /// Fails with [`Error::AlreadyInUse`] if another handle holds the key and
    /// with [`Error::InvalidResource`] if the key is outside the registry. Both
    /// are reported through the error sink.
    pub fn allocate(&self, key: R) -> Result<ResourceHandle<'_, R, C, N>, Error> {
        let group = key.group();
        if group >= N {
            self.diag
                .error(format_args!("{} {:?} is not a valid resource", self.name, key));
            return Err(Error::InvalidResource);
        }

        let mask = key.mask();
        let result = critical_section::with(|cs| {
            let cell = self.groups.borrow(cs);
            let mut groups = cell.get();
            if groups[group] & mask != 0 {
                return Err(Error::AlreadyInUse);
            }

            let first = groups[group] == 0;
            groups[group] |= mask;
            cell.set(groups);
            if first {
                self.control.set_group_clock(group, true);
            }
            Ok(first)
        });

        match result {
            Ok(first) => {
                if first {
                    trace!("{}: group {} enabled", self.name, group);
                }
                Ok(ResourceHandle {
                    registry: self,
                    key,
                })
            }
            Err(e) => {
                self.diag
                    .error(format_args!("{} {:?} already in use", self.name, key));
                Err(e)
            }
        }
    }

    fn deallocate(&self, key: R) {
        let group = key.group();
        let mask = key.mask();
        let last = critical_section::with(|cs| {
            let cell = self.groups.borrow(cs);
            let mut groups = cell.get();
            if groups[group] & mask == 0 {
                return false;
            }

            groups[group] &= !mask;
            cell.set(groups);
            let last = groups[group] == 0;
            if last {
                self.control.set_group_clock(group, false);
            }
            last
        });

        if last {
            trace!("{}: group {} disabled", self.name, group);
        }
    }

    /// Whether `key` is currently held.
    pub fn is_allocated(&self, key: R) -> bool {
        let group = key.group();
        group < N && critical_section::with(|cs| self.groups.borrow(cs).get()[group]) & key.mask() != 0
    }

    /// Allocation mask of `group`, zero when the group clock is off.
    pub fn group_mask(&self, group: usize) -> u32 {
        critical_section::with(|cs| self.groups.borrow(cs).get().get(group).copied().unwrap_or(0))
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    pub fn diagnostics(&self) -> &'d Diagnostics {
        self.diag
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Exclusive grant of one resource.
///
/// Only [`ResourceRegistry::allocate`] creates handles. The resource is
/// released exactly once, when the handle is dropped or consumed by
/// [`ResourceHandle::release`]. Moving the handle moves the ownership.
pub struct ResourceHandle<'a, R: Resource, C: GroupClock, const N: usize> {
    registry: &'a ResourceRegistry<'a, R, C, N>,
    key: R,
}

impl<'a, R: Resource, C: GroupClock, const N: usize> ResourceHandle<'a, R, C, N> {
    pub fn key(&self) -> R {
        self.key
    }

    pub fn registry(&self) -> &'a ResourceRegistry<'a, R, C, N> {
        self.registry
    }

    /// Release the resource now.
    pub fn release(self) {}
}

impl<R: Resource, C: GroupClock, const N: usize> Drop for ResourceHandle<'_, R, C, N> {
    fn drop(&mut self) {
        self.registry.deallocate(self.key);
    }
}

impl<R: Resource, C: GroupClock, const N: usize> fmt::Debug for ResourceHandle<'_, R, C, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("registry", &self.registry.name)
            .field("key", &self.key)
            .finish()
    }
}

/// A peripheral instance forming a group of its own.
macro_rules! unit_resource {
    ($(#[$meta:meta])* $name:ident { $($unit:ident = $idx:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum $name {
            $($unit = $idx,)+
        }

        impl $name {
            pub const COUNT: usize = [$($idx),+].len();

            pub fn index(self) -> usize {
                self as usize
            }
        }

        impl $crate::resource::Resource for $name {
            fn group(&self) -> usize {
                *self as usize
            }

            fn mask(&self) -> u32 {
                1
            }
        }
    };
}

pub(crate) use unit_resource;

#[cfg(test)]
mod test {
    use super::*;
    use crate::diag::test::{capturing, errors};

    use std::cell::RefCell;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Bit(usize, u8);

    impl Resource for Bit {
        fn group(&self) -> usize {
            self.0
        }

        fn mask(&self) -> u32 {
            1 << self.1
        }
    }

    #[derive(Default)]
    struct ClockLog(RefCell<Vec<(usize, bool)>>);

    impl GroupClock for ClockLog {
        fn set_group_clock(&self, group: usize, enabled: bool) {
            self.0.borrow_mut().push((group, enabled));
        }
    }

    #[test]
    fn test_double_allocation() {
        let diag = capturing();
        let registry: ResourceRegistry<Bit, (), 2> = ResourceRegistry::new("pin", (), diag);

        let first = registry.allocate(Bit(0, 3)).expect("allocation unexpectedly failed");
        assert_eq!(registry.allocate(Bit(0, 3)).err(), Some(Error::AlreadyInUse));
        assert_eq!(errors(), ["pin Bit(0, 3) already in use"]);

        drop(first);
        assert!(!registry.is_allocated(Bit(0, 3)));
        let again = registry.allocate(Bit(0, 3)).expect("reallocation unexpectedly failed");
        assert!(registry.is_allocated(again.key()));
    }

    #[test]
    fn test_invalid_group() {
        let diag = capturing();
        let registry: ResourceRegistry<Bit, (), 2> = ResourceRegistry::new("pin", (), diag);

        assert_eq!(registry.allocate(Bit(2, 0)).err(), Some(Error::InvalidResource));
        assert_eq!(errors().len(), 1);
        assert!(!registry.is_allocated(Bit(2, 0)));
    }

    #[test]
    fn test_group_clock_transitions() {
        let diag = capturing();
        let registry: ResourceRegistry<Bit, ClockLog, 2> =
            ResourceRegistry::new("pin", ClockLog::default(), diag);

        let a = registry.allocate(Bit(1, 0)).expect("allocation unexpectedly failed");
        let b = registry.allocate(Bit(1, 5)).expect("allocation unexpectedly failed");
        let c = registry.allocate(Bit(0, 2)).expect("allocation unexpectedly failed");
        assert_eq!(registry.group_mask(1), 0b10_0001);

        a.release();
        assert_eq!(*registry.control().0.borrow(), [(1, true), (0, true)]);

        drop(b);
        drop(c);
        assert_eq!(
            *registry.control().0.borrow(),
            [(1, true), (0, true), (1, false), (0, false)]
        );
        assert_eq!(registry.group_mask(1), 0);
    }

    #[test]
    fn test_moved_handle_releases_once() {
        let diag = capturing();
        let registry: ResourceRegistry<Bit, ClockLog, 1> =
            ResourceRegistry::new("pin", ClockLog::default(), diag);

        let handle = registry.allocate(Bit(0, 1)).expect("allocation unexpectedly failed");
        let _other = registry.allocate(Bit(0, 2)).expect("allocation unexpectedly failed");
        let mut holder = Vec::new();
        holder.push(handle);
        let moved = holder.pop().expect("handle unexpectedly missing");

        moved.release();
        drop(holder);
        assert!(!registry.is_allocated(Bit(0, 1)));
        assert!(registry.is_allocated(Bit(0, 2)));
        assert_eq!(*registry.control().0.borrow(), [(0, true)]);
    }

    unit_resource! {
        Unit { First = 0, Second = 1 }
    }

    #[test]
    fn test_unit_resource() {
        let diag = capturing();
        let registry: ResourceRegistry<Unit, (), { Unit::COUNT }> =
            ResourceRegistry::new("unit", (), diag);

        let _first = registry.allocate(Unit::First).expect("allocation unexpectedly failed");
        let _second = registry.allocate(Unit::Second).expect("allocation unexpectedly failed");
        assert!(registry.allocate(Unit::Second).is_err());
        assert_eq!(errors(), ["unit Second already in use"]);
    }
}
