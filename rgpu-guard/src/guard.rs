//! Intrusive reference guard ([`ReferenceGuard`]) and the non-owning
//! [`StrongReference`] that charges it.
//!
//! A guarded object embeds a [`ReferenceGuard`] and implements [`Guarded`].
//! Every long-lived dependency on the object is expressed as a
//! [`StrongReference`], which increments the guard's counter when created and
//! decrements it when dropped. The guard never keeps its object alive; it only
//! checks, when the object is dropped, that no strong reference is still
//! outstanding.
//!
//! Borrow checking already prevents dropping an object while a
//! `StrongReference` to it is alive. What it cannot see is a reference that
//! was leaked (`mem::forget`, an `Rc` cycle, a `ManuallyDrop` that is never
//! dropped). Those leave the counter charged, and dropping the object then
//! takes the irrecoverable path: registered callbacks run, the error is
//! logged, and the process aborts. This is not a `Result` because it fires
//! from `Drop`.
//!
//! With the `reference-guard` feature disabled, [`ReferenceGuard`] is a
//! zero-sized type, [`StrongReference`] is a plain reference and every
//! operation compiles to nothing.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::sync::{Mutex, PoisonError};
#[cfg(feature = "reference-guard")]
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Irrecoverable error channel
// ---------------------------------------------------------------------------

/// A guarded object was dropped while strong references to it remained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{object} dropped with {outstanding} strong reference(s) outstanding"
)]
pub struct ReferenceGuardError {
    /// Kind of the guarded object (for example `"RenderPass"`).
    pub object: &'static str,
    /// Number of strong references still charged to the object.
    pub outstanding: u32,
}

type IrrecoverableCallback = Box<dyn Fn(&ReferenceGuardError) + Send + Sync>;

static IRRECOVERABLE_CALLBACKS: Mutex<Vec<IrrecoverableCallback>> =
    Mutex::new(Vec::new());

thread_local! {
    static IN_IRRECOVERABLE: Cell<bool> = const { Cell::new(false) };
}

/// Register a callback that runs before the process aborts on a lifetime
/// violation.
///
/// Callbacks are process-wide and are never removed. They run on the thread
/// that detected the violation, in registration order. A callback must not
/// drop guarded objects itself; a nested violation skips the remaining
/// callbacks and aborts immediately.
pub fn add_irrecoverable_error_callback<F>(callback: F)
where
    F: Fn(&ReferenceGuardError) + Send + Sync + 'static,
{
    IRRECOVERABLE_CALLBACKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Box::new(callback));
}

/// Report a lifetime violation and terminate the process.
///
/// Logs the error, runs every callback registered with
/// [`add_irrecoverable_error_callback`], then calls
/// [`std::process::abort`]. Never returns and never unwinds.
pub fn irrecoverable_error(error: &ReferenceGuardError) -> ! {
    tracing::error!("Irrecoverable lifetime violation: {error}");

    let reentered = IN_IRRECOVERABLE.with(|flag| flag.replace(true));
    if !reentered {
        let callbacks = IRRECOVERABLE_CALLBACKS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(error);
        }
    }

    std::process::abort()
}

// ---------------------------------------------------------------------------
// ReferenceGuard
// ---------------------------------------------------------------------------

/// Intrusive strong-reference counter embedded in a guarded object.
#[cfg(feature = "reference-guard")]
pub struct ReferenceGuard {
    object: &'static str,
    count: AtomicU32,
}

/// Intrusive strong-reference counter embedded in a guarded object.
///
/// Compiled out: zero-sized, every operation is a no-op.
#[cfg(not(feature = "reference-guard"))]
pub struct ReferenceGuard;

#[cfg(feature = "reference-guard")]
impl ReferenceGuard {
    /// Create an uncharged guard. `object` names the owning type in
    /// diagnostics.
    pub const fn new(object: &'static str) -> Self {
        Self {
            object,
            count: AtomicU32::new(0),
        }
    }

    pub fn add_reference(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove_reference(&self) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "{} guard underflow", self.object);
    }

    /// Number of strong references currently charged.
    pub fn reference_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Abort through [`irrecoverable_error`] if any strong reference is
    /// still charged.
    ///
    /// Owners call this at the top of their `Drop` so the check runs before
    /// the native handle is destroyed. The guard's own `Drop` repeats it.
    pub fn check_unreferenced(&self) {
        let outstanding = self.reference_count();
        if outstanding != 0 {
            irrecoverable_error(&ReferenceGuardError {
                object: self.object,
                outstanding,
            });
        }
    }
}

#[cfg(not(feature = "reference-guard"))]
impl ReferenceGuard {
    pub const fn new(_object: &'static str) -> Self {
        Self
    }

    #[inline(always)]
    pub fn add_reference(&self) {}

    #[inline(always)]
    pub fn remove_reference(&self) {}

    /// Always zero when the guard is compiled out.
    #[inline(always)]
    pub fn reference_count(&self) -> u32 {
        0
    }

    #[inline(always)]
    pub fn check_unreferenced(&self) {}
}

#[cfg(feature = "reference-guard")]
impl Drop for ReferenceGuard {
    fn drop(&mut self) {
        self.check_unreferenced();
    }
}

impl fmt::Debug for ReferenceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceGuard")
            .field("references", &self.reference_count())
            .finish()
    }
}

/// Implemented by every type that embeds a [`ReferenceGuard`].
pub trait Guarded {
    fn reference_guard(&self) -> &ReferenceGuard;
}

// ---------------------------------------------------------------------------
// StrongReference
// ---------------------------------------------------------------------------

/// A non-owning, non-nullable reference that charges a guarded object's
/// counter for as long as it lives.
///
/// Cloning charges the counter again; dropping discharges it. Moving a
/// `StrongReference` transfers its charge without touching the counter.
pub struct StrongReference<'a, T: ?Sized> {
    object: &'a T,
    #[cfg(feature = "reference-guard")]
    guard: &'a ReferenceGuard,
}

impl<'a, T> StrongReference<'a, T>
where
    T: Guarded + ?Sized,
{
    /// Take a strong reference to `object`, charging its own guard.
    pub fn new(object: &'a T) -> Self {
        Self::charge(object, object.reference_guard())
    }
}

impl<'a, T: ?Sized> StrongReference<'a, T> {
    /// Take a strong reference to `object`, charging the guard of its `B`
    /// part.
    ///
    /// Use this when `T` is composed of several guarded parts and the
    /// dependency is on one of them specifically.
    pub fn with_guard_of<B>(object: &'a T) -> Self
    where
        T: AsRef<B>,
        B: Guarded + ?Sized + 'a,
    {
        let base: &'a B = object.as_ref();
        Self::charge(object, base.reference_guard())
    }

    #[cfg(feature = "reference-guard")]
    fn charge(object: &'a T, guard: &'a ReferenceGuard) -> Self {
        guard.add_reference();
        Self { object, guard }
    }

    #[cfg(not(feature = "reference-guard"))]
    #[inline(always)]
    fn charge(object: &'a T, _guard: &'a ReferenceGuard) -> Self {
        Self { object }
    }

    /// The referenced object, with the reference's full lifetime.
    pub fn get(&self) -> &'a T {
        self.object
    }

    /// Whether both references point at the same object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        std::ptr::addr_eq(this.object, other.object)
    }
}

impl<T: ?Sized> Clone for StrongReference<'_, T> {
    fn clone(&self) -> Self {
        #[cfg(feature = "reference-guard")]
        {
            Self::charge(self.object, self.guard)
        }
        #[cfg(not(feature = "reference-guard"))]
        {
            Self {
                object: self.object,
            }
        }
    }
}

#[cfg(feature = "reference-guard")]
impl<T: ?Sized> Drop for StrongReference<'_, T> {
    fn drop(&mut self) {
        self.guard.remove_reference();
    }
}

impl<T: ?Sized> Deref for StrongReference<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.object
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for StrongReference<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StrongReference")
            .field(&self.object)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Tracked {
        guard: ReferenceGuard,
        value: u32,
    }

    impl Tracked {
        fn new(value: u32) -> Self {
            Self {
                guard: ReferenceGuard::new("Tracked"),
                value,
            }
        }
    }

    impl Guarded for Tracked {
        fn reference_guard(&self) -> &ReferenceGuard {
            &self.guard
        }
    }

    #[derive(Debug)]
    struct Layered {
        guard: ReferenceGuard,
    }

    impl Guarded for Layered {
        fn reference_guard(&self) -> &ReferenceGuard {
            &self.guard
        }
    }

    // Two guarded parts; references must pick one explicitly.
    struct Composite {
        tracked: Tracked,
        layered: Layered,
    }

    impl AsRef<Tracked> for Composite {
        fn as_ref(&self) -> &Tracked {
            &self.tracked
        }
    }

    impl AsRef<Layered> for Composite {
        fn as_ref(&self) -> &Layered {
            &self.layered
        }
    }

    #[test]
    fn references_released_before_drop_are_clean() {
        let object = Tracked::new(7);
        {
            let refs: Vec<_> =
                (0..4).map(|_| StrongReference::new(&object)).collect();
            assert!(refs.iter().all(|r| r.value == 7));
            #[cfg(feature = "reference-guard")]
            assert_eq!(object.guard.reference_count(), 4);
        }
        assert_eq!(object.guard.reference_count(), 0);
        drop(object);
    }

    #[test]
    fn clone_charges_and_move_does_not() {
        let object = Tracked::new(1);
        let first = StrongReference::new(&object);
        let second = first.clone();
        #[cfg(feature = "reference-guard")]
        assert_eq!(object.guard.reference_count(), 2);

        let moved = first;
        #[cfg(feature = "reference-guard")]
        assert_eq!(object.guard.reference_count(), 2);
        assert!(StrongReference::ptr_eq(&moved, &second));

        drop(moved);
        #[cfg(feature = "reference-guard")]
        assert_eq!(object.guard.reference_count(), 1);
        drop(second);
        assert_eq!(object.guard.reference_count(), 0);
    }

    #[test]
    fn reassignment_discharges_previous_target() {
        let a = Tracked::new(1);
        let b = Tracked::new(2);
        let mut reference = StrongReference::new(&a);
        assert_eq!(reference.value, 1);
        #[cfg(feature = "reference-guard")]
        assert_eq!(a.guard.reference_count(), 1);

        reference = StrongReference::new(&b);
        assert_eq!(reference.value, 2);
        assert_eq!(a.guard.reference_count(), 0);
        #[cfg(feature = "reference-guard")]
        assert_eq!(b.guard.reference_count(), 1);
    }

    #[test]
    fn base_selection_charges_only_the_chosen_guard() {
        let composite = Composite {
            tracked: Tracked::new(3),
            layered: Layered {
                guard: ReferenceGuard::new("Layered"),
            },
        };

        let by_layer =
            StrongReference::<Composite>::with_guard_of::<Layered>(&composite);
        assert_eq!(composite.tracked.guard.reference_count(), 0);
        #[cfg(feature = "reference-guard")]
        assert_eq!(composite.layered.guard.reference_count(), 1);

        let by_tracked =
            StrongReference::<Composite>::with_guard_of::<Tracked>(&composite);
        #[cfg(feature = "reference-guard")]
        assert_eq!(composite.tracked.guard.reference_count(), 1);
        assert_eq!(by_tracked.get().tracked.value, 3);

        drop(by_layer);
        drop(by_tracked);
        assert_eq!(composite.layered.guard.reference_count(), 0);
    }

    #[cfg(not(feature = "reference-guard"))]
    #[test]
    fn compiled_out_guard_is_free() {
        assert_eq!(std::mem::size_of::<ReferenceGuard>(), 0);
        assert_eq!(
            std::mem::size_of::<StrongReference<'static, Tracked>>(),
            std::mem::size_of::<&Tracked>()
        );
    }

    const DEATH_TEST_ENV: &str = "RGPU_GUARD_DEATH_TEST";
    const CALLBACK_MARKER: &str = "irrecoverable callback:";

    /// Runs only when re-executed by `leaked_reference_aborts_after_callbacks`.
    #[test]
    fn leaked_reference_child() {
        if std::env::var_os(DEATH_TEST_ENV).is_none() {
            return;
        }
        add_irrecoverable_error_callback(|error| {
            eprintln!("{CALLBACK_MARKER} {error}");
        });

        let object = Tracked::new(0);
        std::mem::forget(StrongReference::new(&object));
        drop(object);

        eprintln!("drop returned with a leaked reference");
    }

    #[cfg(feature = "reference-guard")]
    #[test]
    fn leaked_reference_aborts_after_callbacks() {
        let exe = std::env::current_exe().expect("test binary path");
        let output = std::process::Command::new(exe)
            .args([
                "--exact",
                "guard::tests::leaked_reference_child",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(DEATH_TEST_ENV, "1")
            .output()
            .expect("re-run test binary");

        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            !output.status.success(),
            "child exited cleanly: {stderr}"
        );
        assert!(
            stderr.contains(&format!(
                "{CALLBACK_MARKER} Tracked dropped with 1 strong reference(s) \
                 outstanding"
            )),
            "callback did not fire: {stderr}"
        );
        assert!(!stderr.contains("drop returned"));
    }
}
