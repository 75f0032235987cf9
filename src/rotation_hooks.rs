//! Callback types for rotation notifications. Both are invoked with the
//! pool lock released.

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::PoolError;

/// Invoked when `check_rotation_needed` finds a candidate, one call per id.
pub type RotationNeededHook =
    Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked just before `complete_rotation` removes a credential. An error
/// aborts the completion.
pub type DecommissionHook =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), PoolError>> + Send + Sync>;
