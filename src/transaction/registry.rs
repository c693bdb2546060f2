//! Step function registry
//!
//! Every component that defines steps registers them during startup. The
//! registry is then frozen behind an `Arc` and only looked up; there is no
//! removal and no registration after the node starts serving.

use super::TxnCtx;
use crate::common::Result;
use crate::env::NodeEnv;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Logic run on a node for a named step
#[async_trait]
pub trait StepFunc: Send + Sync {
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()>;
}

/// Step function backed by a closure, see [`step_fn`]
pub struct FnStep<F>(F);

/// Wrap a closure returning a boxed future as a [`StepFunc`]
///
/// ```ignore
/// registry.register("vol-create.Store", step_fn(|env, ctx| Box::pin(async move {
///     let volinfo: Volinfo = ctx.get("volinfo")?;
///     env.metadata.put_volume(&volinfo).await
/// })))?;
/// ```
pub fn step_fn<F>(f: F) -> FnStep<F>
where
    F: for<'a> Fn(&'a NodeEnv, &'a mut TxnCtx) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    FnStep(f)
}

#[async_trait]
impl<F> StepFunc for FnStep<F>
where
    F: for<'a> Fn(&'a NodeEnv, &'a mut TxnCtx) -> BoxFuture<'a, Result<()>> + Send + Sync,
{
    async fn run(&self, env: &NodeEnv, ctx: &mut TxnCtx) -> Result<()> {
        (self.0)(env, ctx).await
    }
}

#[derive(Default)]
pub struct StepRegistry {
    funcs: HashMap<String, Arc<dyn StepFunc>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`. A name registered twice is a startup error.
    pub fn register(&mut self, name: &str, func: impl StepFunc + 'static) -> Result<()> {
        self.register_arc(name, Arc::new(func))
    }

    pub fn register_arc(&mut self, name: &str, func: Arc<dyn StepFunc>) -> Result<()> {
        if self.funcs.contains_key(name) {
            return Err(crate::Error::DuplicateRegistration {
                kind: "step function",
                name: name.to_string(),
            });
        }
        self.funcs.insert(name.to_string(), func);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn StepFunc>> {
        self.funcs
            .get(name)
            .cloned()
            .ok_or_else(|| crate::Error::StepFuncNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

static GLOBAL: OnceCell<Arc<StepRegistry>> = OnceCell::new();

/// Freeze `registry` as the process-wide registry. Only the first call wins.
pub fn install(registry: StepRegistry) -> Result<Arc<StepRegistry>> {
    let registry = Arc::new(registry);
    GLOBAL
        .set(registry.clone())
        .map_err(|_| crate::Error::Internal("step registry already installed".into()))?;
    Ok(registry)
}

pub fn global() -> Option<Arc<StepRegistry>> {
    GLOBAL.get().cloned()
}
