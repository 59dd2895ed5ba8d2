//! The "serialize pool access" capability spec §5 treats as an external
//! collaborator.
//!
//! `tlsf.c` abstracts its host RTOS's mutex behind four macros
//! (`TLSF_CREATE_LOCK`/`TLSF_ACQUIRE_LOCK`/`TLSF_RELEASE_LOCK`/
//! `TLSF_DESTROY_LOCK`, wired up in `target.h`). [`RawPoolLock`] is the Rust
//! equivalent: a trait the host supplies an implementation of, rather than a
//! concrete type this crate hard-codes. The real lock (a reentrant,
//! priority-inheriting RTOS mutex, per spec §5) lives entirely on the
//! caller's side of this boundary — this crate only ships the two
//! reference backends a bare-metal pool actually needs.

/// A lock capable of serializing access to a single [`crate::tlsf::Tlsf`]
/// pool.
///
/// Implementations MUST be reentrant-safe if the application intends to call
/// into the pool recursively (e.g. from within a `Drop` impl invoked while
/// already holding the lock) — this crate itself never recurses while
/// holding the lock, but the spec requires the capability exist (§5) because
/// some RTOS integrations do.
///
/// # Interrupt context
///
/// [`Self::in_isr`] lets the pool skip locking entirely when called from an
/// ISR, per spec §5. **What happens if an ISR and a task both enter the pool
/// at the same time without some other form of exclusion is undefined** —
/// this crate reproduces that hook rather than paper over it with false
/// safety. A pool that may be touched by both an ISR and task code must
/// arrange its own mutual exclusion (e.g. by masking the relevant interrupt
/// around task-side calls).
pub trait RawPoolLock {
    /// Acquire the lock, blocking until it is available. Lock acquisition is
    /// unbounded-wait by contract (spec §5): there is no timeout or
    /// cancellation.
    fn lock(&self);

    /// Release a previously acquired lock.
    fn unlock(&self);

    /// Returns `true` if the current execution context is an interrupt
    /// service routine. When `true`, [`Self::lock`]/[`Self::unlock`] are not
    /// called by the pool at all.
    #[inline]
    fn in_isr(&self) -> bool {
        false
    }
}

/// A lock that does nothing.
///
/// Appropriate only for pools that are either single-threaded or externally
/// synchronized (e.g. masked interrupts, a single cooperative task). Using
/// this with a pool that is genuinely shared across preemptible contexts is
/// a data race.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLock;

impl RawPoolLock for NullLock {
    #[inline]
    fn lock(&self) {}
    #[inline]
    fn unlock(&self) {}
}

cfg_if::cfg_if! {
    if #[cfg(feature = "spin")] {
        /// A [`RawPoolLock`] backed by a spinlock.
        ///
        /// This is **not** priority-inheriting, so on an RTOS with priority
        /// scheduling it is vulnerable to the same unbounded priority
        /// inversion spec §5 calls out — it exists as a working default for
        /// hosted/bare-metal targets without an RTOS, not as a substitute for
        /// a real RTOS mutex.
        #[derive(Debug, Default)]
        pub struct SpinLock(spin::mutex::SpinMutex<()>);

        impl SpinLock {
            /// Create a new, unlocked `SpinLock`.
            #[inline]
            pub const fn new() -> Self {
                Self(spin::mutex::SpinMutex::new(()))
            }
        }

        impl RawPoolLock for SpinLock {
            #[inline]
            fn lock(&self) {
                core::mem::forget(self.0.lock());
            }

            #[inline]
            fn unlock(&self) {
                // Safety: `lock` above acquired the lock and immediately
                // forgot the guard instead of releasing it, so exactly one
                // outstanding critical section is pending release here.
                unsafe { self.0.force_unlock() };
            }
        }
    }
}
