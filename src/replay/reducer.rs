//! Reducer contract for folding a stream into state.

use std::error::Error;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Folds chunk payloads into a materialized state.
///
/// `apply` sees payloads in index order and returns the next state. State
/// must serialize both ways because fold results are persisted as
/// snapshots and resumed from them.
#[async_trait]
pub trait Reducer: Send + Sync {
    type State: Serialize + DeserializeOwned + Send;

    /// Part of the snapshot partition key; two reducers folding the same
    /// stream need distinct names.
    fn name(&self) -> &str;

    /// Bump when `apply` or the state layout changes shape. Snapshots
    /// written under another schema version are ignored.
    fn schema_version(&self) -> &str {
        "1"
    }

    /// The state a fold starts from when no snapshot applies.
    fn seed(&self) -> Self::State;

    async fn apply(
        &self,
        state: Self::State,
        payload: &Value,
    ) -> Result<Self::State, Box<dyn Error + Send + Sync>>;
}

/// Builds a [`Reducer`] from plain closures, for folds that do not earn a
/// dedicated type.
pub struct ReducerFn<S, F> {
    name: String,
    schema_version: String,
    seed: S,
    apply: F,
}

impl<S, F> ReducerFn<S, F>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
    F: Fn(S, &Value) -> S + Send + Sync,
{
    pub fn new(name: impl Into<String>, seed: S, apply: F) -> Self {
        Self {
            name: name.into(),
            schema_version: "1".to_string(),
            seed,
            apply,
        }
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = schema_version.into();
        self
    }
}

#[async_trait]
impl<S, F> Reducer for ReducerFn<S, F>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
    F: Fn(S, &Value) -> S + Send + Sync,
{
    type State = S;

    fn name(&self) -> &str {
        &self.name
    }

    fn schema_version(&self) -> &str {
        &self.schema_version
    }

    fn seed(&self) -> S {
        self.seed.clone()
    }

    async fn apply(
        &self,
        state: S,
        payload: &Value,
    ) -> Result<S, Box<dyn Error + Send + Sync>> {
        Ok((self.apply)(state, payload))
    }
}
