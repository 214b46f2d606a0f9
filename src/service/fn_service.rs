//! # Closure-backed service (`FnService`).
//!
//! [`FnService`] builds a [`Service`] from plain closures, one per hook.
//! Each invocation produces a fresh future, so hooks hold no hidden mutable
//! state; share state explicitly with `Arc` inside the closures.
//!
//! ## Example
//! ```rust
//! use servisor::{FnService, HealthReport};
//!
//! let svc = FnService::builder("warmup")
//!     .on_start(|| async { Ok(()) })
//!     .on_health_check(|| async { Ok(HealthReport::healthy()) })
//!     .build();
//! assert_eq!(svc.name(), "warmup");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::ServiceError;
use crate::service::{HealthReport, Service, ServiceRef};

type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ServiceError>> + Send + Sync>;
type HealthHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<HealthReport, ServiceError>> + Send + Sync>;

/// Service assembled from closures. Unset hooks are no-ops; an unset health
/// hook reports healthy.
pub struct FnService {
    name: Cow<'static, str>,
    init: Option<Hook>,
    start: Option<Hook>,
    stop: Option<Hook>,
    pause: Option<Hook>,
    resume: Option<Hook>,
    health: Option<HealthHook>,
}

impl FnService {
    /// Starts a builder for a service with the given name.
    pub fn builder(name: impl Into<Cow<'static, str>>) -> FnServiceBuilder {
        FnServiceBuilder {
            name: name.into(),
            init: None,
            start: None,
            stop: None,
            pause: None,
            resume: None,
            health: None,
        }
    }

    async fn run(hook: &Option<Hook>) -> Result<(), ServiceError> {
        match hook {
            Some(f) => f().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_initialize(&self) -> Result<(), ServiceError> {
        Self::run(&self.init).await
    }

    async fn on_start(&self) -> Result<(), ServiceError> {
        Self::run(&self.start).await
    }

    async fn on_stop(&self) -> Result<(), ServiceError> {
        Self::run(&self.stop).await
    }

    async fn on_pause(&self) -> Result<(), ServiceError> {
        Self::run(&self.pause).await
    }

    async fn on_resume(&self) -> Result<(), ServiceError> {
        Self::run(&self.resume).await
    }

    async fn on_health_check(&self) -> Result<HealthReport, ServiceError> {
        match &self.health {
            Some(f) => f().await,
            None => Ok(HealthReport::healthy()),
        }
    }
}

/// Builder for [`FnService`].
pub struct FnServiceBuilder {
    name: Cow<'static, str>,
    init: Option<Hook>,
    start: Option<Hook>,
    stop: Option<Hook>,
    pause: Option<Hook>,
    resume: Option<Hook>,
    health: Option<HealthHook>,
}

macro_rules! hook_setter {
    ($(#[$doc:meta])* $setter:ident => $field:ident) => {
        $(#[$doc])*
        pub fn $setter<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn() -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
        {
            self.$field = Some(Arc::new(move || f().boxed()));
            self
        }
    };
}

impl FnServiceBuilder {
    hook_setter!(
        /// Sets the `on_initialize` hook.
        on_initialize => init
    );
    hook_setter!(
        /// Sets the `on_start` hook.
        on_start => start
    );
    hook_setter!(
        /// Sets the `on_stop` hook.
        on_stop => stop
    );
    hook_setter!(
        /// Sets the `on_pause` hook.
        on_pause => pause
    );
    hook_setter!(
        /// Sets the `on_resume` hook.
        on_resume => resume
    );

    /// Sets the `on_health_check` hook.
    pub fn on_health_check<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthReport, ServiceError>> + Send + 'static,
    {
        self.health = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Finishes the builder as a shared [`ServiceRef`].
    pub fn build(self) -> ServiceRef {
        Arc::new(FnService {
            name: self.name,
            init: self.init,
            start: self.start,
            stop: self.stop,
            pause: self.pause,
            resume: self.resume,
            health: self.health,
        })
    }
}
