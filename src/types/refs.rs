use futures::lock::MutexGuard;
use owning_ref::{OwningRef, OwningRefMut, StableAddress};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use crate::ClientInner;

// The guard dereferences into the mutex itself, which the client keeps behind an `Arc`, so the
// target address never moves while the guard is alive. That is the guarantee `StableAddress`
// asks for, letting the guard back an `OwningRef`.
pub struct AnchoredGuard<'a, T: ?Sized>(pub(crate) MutexGuard<'a, T>);

unsafe impl<'a, T: ?Sized> StableAddress for AnchoredGuard<'a, T> {}

impl<T: ?Sized> Deref for AnchoredGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.0
    }
}

impl<T: ?Sized> DerefMut for AnchoredGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.0
    }
}

/// A borrowed view of state behind the [`Client`](struct.Client.html)'s internal mutex
///
/// Holding the view keeps the mutex locked. Drop it as soon as the data has been read.
pub struct ClientRef<'a, T: ?Sized>(pub(crate) OwningRef<AnchoredGuard<'a, ClientInner>, T>);

impl<'a, T: ?Sized> Deref for ClientRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.0
    }
}

impl<'a, T: fmt::Debug + ?Sized> fmt::Debug for ClientRef<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A mutable borrowed view of state behind the [`Client`](struct.Client.html)'s internal mutex
///
/// Holding the view keeps the mutex locked. Drop it as soon as the data has been changed.
pub struct ClientRefMut<'a, T: ?Sized>(pub(crate) OwningRefMut<AnchoredGuard<'a, ClientInner>, T>);

impl<'a, T: ?Sized> Deref for ClientRefMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.0
    }
}

impl<'a, T: ?Sized> DerefMut for ClientRefMut<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.0
    }
}

impl<'a, T: fmt::Debug + ?Sized> fmt::Debug for ClientRefMut<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
