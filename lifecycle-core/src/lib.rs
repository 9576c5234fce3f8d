//! Two-state lifecycle contract shared by every stateful entity in the host.
//!
//! Entities move `New -> Ready -> Finished` and never backwards. The contract
//! detects the three classic misuses:
//!
//! - **Double initialization**: `initialize()` on a `Ready` or `Finished`
//!   entity fails with [`LifecycleError::AlreadyInitialized`].
//! - **Use before initialization**: business operations on a `New` entity
//!   fail with [`LifecycleError::NotInitialized`].
//! - **Teardown before initialization**: `finish()` on a `New` entity fails
//!   with [`LifecycleError::NotInitialized`]; `finish()` on an already
//!   `Finished` entity is a no-op.
//!
//! A failed initialization leaves the entity in `New` with no partially-ready
//! state observable. Setup and teardown failures carry a caller-supplied
//! business error type in [`LifecycleError::Setup`] / [`LifecycleError::Teardown`].
//!
//! Two composition styles are offered: [`LifecycleTracker`] for owners that
//! manage trait objects and drive the hooks themselves, and [`Lifecycle`]
//! wrapping a concrete [`Managed`] value.

use async_trait::async_trait;
use thiserror::Error;

/// Lifecycle state of a managed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, not yet initialized
    New,
    /// Initialized and available for business operations
    Ready,
    /// Torn down; terminal
    Finished,
}

/// Lifecycle contract violations and hook failures.
///
/// `E` is the business error type produced by the entity's own setup and
/// teardown logic; misuse variants carry no business error.
#[derive(Error, Debug)]
pub enum LifecycleError<E> {
    /// `initialize()` called on an entity that is already `Ready` or `Finished`
    #[error("already initialized (current state: {0:?})")]
    AlreadyInitialized(LifecycleState),

    /// Operation requiring `Ready` called on a `New` entity
    #[error("not initialized")]
    NotInitialized,

    /// Initialization hook failed; the entity remains `New`
    #[error("initialization failed: {0}")]
    Setup(E),

    /// Teardown hook failed; the entity still reaches `Finished`
    #[error("teardown failed: {0}")]
    Teardown(E),
}

impl<E> LifecycleError<E> {
    /// True for the programming-error variants that indicate contract misuse
    /// rather than a failing hook.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyInitialized(_) | Self::NotInitialized)
    }
}

/// Reusable state machine for entities that drive their own hooks.
///
/// Owners call `begin_*` to validate a transition, run their setup or
/// teardown, then `complete_*` to commit it. Skipping `complete_initialize`
/// after a failed setup leaves the tracker in `New`, which is exactly the
/// no-partial-state guarantee.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    state: LifecycleState,
}

impl LifecycleTracker {
    /// Create a tracker in the `New` state.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::New,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True once `complete_initialize` has run and `complete_finish` has not.
    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    /// Validate an `initialize()` attempt.
    pub fn begin_initialize<E>(&self) -> Result<(), LifecycleError<E>> {
        match self.state {
            LifecycleState::New => Ok(()),
            other => Err(LifecycleError::AlreadyInitialized(other)),
        }
    }

    /// Commit a successful initialization.
    pub fn complete_initialize(&mut self) {
        self.state = LifecycleState::Ready;
    }

    /// Validate a `finish()` attempt.
    ///
    /// Returns `Ok(true)` when teardown should run, `Ok(false)` when the
    /// entity is already `Finished` (idempotent no-op).
    pub fn begin_finish<E>(&self) -> Result<bool, LifecycleError<E>> {
        match self.state {
            LifecycleState::Ready => Ok(true),
            LifecycleState::Finished => Ok(false),
            LifecycleState::New => Err(LifecycleError::NotInitialized),
        }
    }

    /// Commit a teardown attempt. Teardown is one-shot, so this runs whether
    /// or not the hook succeeded.
    pub fn complete_finish(&mut self) {
        self.state = LifecycleState::Finished;
    }

    /// Guard for business operations that require the `Ready` state.
    pub fn require_ready<E>(&self) -> Result<(), LifecycleError<E>> {
        match self.state {
            LifecycleState::Ready => Ok(()),
            LifecycleState::New => Err(LifecycleError::NotInitialized),
            LifecycleState::Finished => {
                Err(LifecycleError::AlreadyInitialized(LifecycleState::Finished))
            }
        }
    }
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity with subclass-defined setup and teardown hooks.
#[async_trait]
pub trait Managed: Send + Sync {
    /// Business error type of the setup/teardown hooks.
    type Error: Send;

    /// One-time setup; runs during `initialize()`.
    async fn on_initialize(&mut self) -> Result<(), Self::Error>;

    /// One-time teardown; runs during `finish()`.
    async fn on_finish(&mut self) -> Result<(), Self::Error>;
}

/// A [`Managed`] value paired with its [`LifecycleTracker`].
pub struct Lifecycle<T: Managed> {
    inner: T,
    tracker: LifecycleTracker,
}

impl<T: Managed> Lifecycle<T> {
    /// Wrap a freshly constructed value in the `New` state.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            tracker: LifecycleTracker::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.tracker.state()
    }

    /// Transition `New -> Ready`, running the setup hook.
    pub async fn initialize(&mut self) -> Result<(), LifecycleError<T::Error>> {
        self.tracker.begin_initialize()?;
        self.inner
            .on_initialize()
            .await
            .map_err(LifecycleError::Setup)?;
        self.tracker.complete_initialize();
        Ok(())
    }

    /// Transition `Ready -> Finished`, running the teardown hook.
    ///
    /// Idempotent from `Finished`. Teardown gets one attempt: a failing hook
    /// still moves the entity to `Finished` and surfaces
    /// [`LifecycleError::Teardown`].
    pub async fn finish(&mut self) -> Result<(), LifecycleError<T::Error>> {
        if !self.tracker.begin_finish()? {
            return Ok(());
        }
        let outcome = self.inner.on_finish().await;
        self.tracker.complete_finish();
        outcome.map_err(LifecycleError::Teardown)
    }

    /// Access the value for business operations; requires `Ready`.
    pub fn get(&self) -> Result<&T, LifecycleError<T::Error>> {
        self.tracker.require_ready()?;
        Ok(&self.inner)
    }

    /// Mutable access for business operations; requires `Ready`.
    pub fn get_mut(&mut self) -> Result<&mut T, LifecycleError<T::Error>> {
        self.tracker.require_ready()?;
        Ok(&mut self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        init_calls: u32,
        finish_calls: u32,
        fail_init: bool,
        fail_finish: bool,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                init_calls: 0,
                finish_calls: 0,
                fail_init: false,
                fail_finish: false,
            }
        }
    }

    #[async_trait]
    impl Managed for Probe {
        type Error = String;

        async fn on_initialize(&mut self) -> Result<(), String> {
            if self.fail_init {
                return Err("setup boom".to_string());
            }
            self.init_calls += 1;
            Ok(())
        }

        async fn on_finish(&mut self) -> Result<(), String> {
            self.finish_calls += 1;
            if self.fail_finish {
                return Err("teardown boom".to_string());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_transitions_to_ready() {
        let mut entity = Lifecycle::new(Probe::new());
        assert_eq!(entity.state(), LifecycleState::New);

        entity.initialize().await.unwrap();
        assert_eq!(entity.state(), LifecycleState::Ready);
        assert_eq!(entity.get().unwrap().init_calls, 1);
    }

    #[tokio::test]
    async fn test_double_initialize_fails() {
        let mut entity = Lifecycle::new(Probe::new());
        entity.initialize().await.unwrap();

        let err = entity.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AlreadyInitialized(LifecycleState::Ready)
        ));
        assert!(err.is_misuse());
        // The first initialization is still the only one that ran
        assert_eq!(entity.get().unwrap().init_calls, 1);
    }

    #[tokio::test]
    async fn test_use_before_initialize_fails() {
        let entity = Lifecycle::new(Probe::new());
        assert!(matches!(entity.get(), Err(LifecycleError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_new() {
        let mut probe = Probe::new();
        probe.fail_init = true;
        let mut entity = Lifecycle::new(probe);

        let err = entity.initialize().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Setup(_)));
        assert_eq!(entity.state(), LifecycleState::New);

        // Retry is allowed after a failed setup
        entity.get_mut_unchecked().fail_init = false;
        entity.initialize().await.unwrap();
        assert_eq!(entity.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_finish_before_initialize_fails() {
        let mut entity = Lifecycle::new(Probe::new());
        assert!(matches!(
            entity.finish().await.unwrap_err(),
            LifecycleError::NotInitialized
        ));
        assert_eq!(entity.state(), LifecycleState::New);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_from_finished() {
        let mut entity = Lifecycle::new(Probe::new());
        entity.initialize().await.unwrap();
        entity.finish().await.unwrap();
        entity.finish().await.unwrap();
        assert_eq!(entity.state(), LifecycleState::Finished);
    }

    #[tokio::test]
    async fn test_failed_teardown_still_finishes() {
        let mut probe = Probe::new();
        probe.fail_finish = true;
        let mut entity = Lifecycle::new(probe);
        entity.initialize().await.unwrap();

        let err = entity.finish().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Teardown(_)));
        assert_eq!(entity.state(), LifecycleState::Finished);

        // A second finish is the idempotent no-op, the hook does not rerun
        entity.finish().await.unwrap();
        assert_eq!(entity.get_mut_unchecked().finish_calls, 1);
    }

    #[test]
    fn test_tracker_commit_protocol() {
        let mut tracker = LifecycleTracker::new();
        tracker.begin_initialize::<String>().unwrap();
        // Setup failed: no commit, still New and retryable
        assert_eq!(tracker.state(), LifecycleState::New);
        tracker.begin_initialize::<String>().unwrap();
        tracker.complete_initialize();

        tracker.require_ready::<String>().unwrap();
        assert!(tracker.begin_finish::<String>().unwrap());
        tracker.complete_finish();
        assert!(!tracker.begin_finish::<String>().unwrap());
    }

    impl Lifecycle<Probe> {
        /// Test-only escape hatch to mutate a `New` probe.
        fn get_mut_unchecked(&mut self) -> &mut Probe {
            &mut self.inner
        }
    }
}
