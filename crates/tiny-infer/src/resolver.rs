//! Operator registration.

use crate::format::OperatorKind;
use crate::kernels::{FULLY_CONNECTED, Kernel};

/// Looks up the kernel implementing an operator.
pub trait OperatorResolver {
    /// The kernel registered for `kind`, if any.
    fn find(&self, kind: OperatorKind) -> Option<&'static dyn Kernel>;
}

/// Errors raised while registering kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolverError {
    /// Every slot of the resolver is taken.
    #[error("cannot register {kind}: resolver capacity of {capacity} reached")]
    Overflow {
        /// The operator that did not fit.
        kind: OperatorKind,
        /// Number of slots.
        capacity: usize,
    },
    /// The operator already has a kernel.
    #[error("operator {kind} is already registered")]
    Duplicate {
        /// The operator registered twice.
        kind: OperatorKind,
    },
}

/// A resolver holding at most `N` kernels, without allocating.
///
/// Register exactly the operators a model uses:
///
/// ```
/// use tiny_infer::format::OperatorKind;
/// use tiny_infer::resolver::{OpResolver, OperatorResolver};
///
/// let mut resolver = OpResolver::<1>::new();
/// resolver.add_fully_connected().unwrap();
///
/// assert!(resolver.find(OperatorKind::FullyConnected).is_some());
/// assert!(resolver.add_fully_connected().is_err());
/// ```
pub struct OpResolver<const N: usize> {
    kernels: [Option<&'static dyn Kernel>; N],
    len: usize,
}

impl<const N: usize> OpResolver<N> {
    /// An empty resolver.
    pub const fn new() -> Self {
        Self {
            kernels: [None; N],
            len: 0,
        }
    }

    /// Register `kernel` for the operator it implements.
    pub fn add(&mut self, kernel: &'static dyn Kernel) -> Result<(), ResolverError> {
        let kind = kernel.kind();

        if self.len >= N {
            log::warn!("Cannot register {kind}: resolver is full ({} slots)", N);
            return Err(ResolverError::Overflow { kind, capacity: N });
        }
        if self.find(kind).is_some() {
            return Err(ResolverError::Duplicate { kind });
        }

        self.kernels[self.len] = Some(kernel);
        self.len += 1;
        log::trace!("Registered {kind} ({}/{})", self.len, N);

        Ok(())
    }

    /// Register the fully-connected kernel.
    pub fn add_fully_connected(&mut self) -> Result<(), ResolverError> {
        self.add(&FULLY_CONNECTED)
    }

    /// Number of registered kernels.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no kernel is registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of kernels.
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for OpResolver<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> OperatorResolver for OpResolver<N> {
    fn find(&self, kind: OperatorKind) -> Option<&'static dyn Kernel> {
        self.kernels[..self.len]
            .iter()
            .flatten()
            .copied()
            .find(|kernel| kernel.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resolver_finds_nothing() {
        let resolver = OpResolver::<2>::new();

        assert!(resolver.is_empty());
        assert_eq!(resolver.capacity(), 2);
        assert!(resolver.find(OperatorKind::FullyConnected).is_none());
    }

    #[test]
    fn registered_kernel_is_found() {
        let mut resolver = OpResolver::<1>::new();
        resolver.add_fully_connected().unwrap();

        let kernel = resolver.find(OperatorKind::FullyConnected).unwrap();
        assert_eq!(kernel.kind(), OperatorKind::FullyConnected);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn registering_beyond_capacity_overflows() {
        let mut resolver = OpResolver::<1>::new();
        resolver.add_fully_connected().unwrap();

        assert_eq!(
            resolver.add_fully_connected(),
            Err(ResolverError::Overflow {
                kind: OperatorKind::FullyConnected,
                capacity: 1
            })
        );
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut resolver = OpResolver::<0>::new();

        assert!(matches!(
            resolver.add_fully_connected(),
            Err(ResolverError::Overflow { capacity: 0, .. })
        ));
    }

    #[test]
    fn duplicate_registration() {
        let mut resolver = OpResolver::<2>::new();
        resolver.add_fully_connected().unwrap();

        assert_eq!(
            resolver.add_fully_connected(),
            Err(ResolverError::Duplicate {
                kind: OperatorKind::FullyConnected
            })
        );
        assert_eq!(resolver.len(), 1);
    }
}
