/// Bidirectional data-shape converters between provider formats
///
/// Transforms are registered per direction under `"<from>To<To>"` keys and
/// applied to both request params (primary -> alternate) and responses
/// (alternate -> primary), so gateway callers only ever see the primary
/// provider's shapes. A missing transform is logged and the value passes
/// through unmodified - it never fails the request.

use crate::errors::GatewayResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type TransformFn = Arc<dyn Fn(Value) -> GatewayResult<Value> + Send + Sync>;

#[derive(Default)]
pub struct SchemaTransformer {
    transforms: RwLock<HashMap<String, TransformFn>>,
}

/// `("ordiscan", "geniidata")` -> `"ordiscanToGeniidata"`
fn transform_key(from: &str, to: &str) -> String {
    let mut capitalized = String::with_capacity(to.len());
    let mut chars = to.chars();
    if let Some(first) = chars.next() {
        capitalized.extend(first.to_uppercase());
        capitalized.extend(chars);
    }
    format!("{}To{}", from, capitalized)
}

impl SchemaTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, from: &str, to: &str, transform: F)
    where
        F: Fn(Value) -> GatewayResult<Value> + Send + Sync + 'static,
    {
        let key = transform_key(from, to);
        self.transforms.write().insert(key, Arc::new(transform));
    }

    pub fn has_transform(&self, from: &str, to: &str) -> bool {
        self.transforms
            .read()
            .contains_key(&transform_key(from, to))
    }

    /// Convert `value` from `from`'s schema to `to`'s. Same provider or no
    /// registered transform: pass through (the latter with a warning). A
    /// transform that itself errors also falls back to pass-through - a bad
    /// converter must not take the request down with it.
    pub fn transform(&self, from: &str, to: &str, value: Value) -> Value {
        if from == to {
            return value;
        }

        let transform = {
            let transforms = self.transforms.read();
            transforms.get(&transform_key(from, to)).cloned()
        };

        match transform {
            Some(f) => match f(value.clone()) {
                Ok(converted) => converted,
                Err(e) => {
                    log::warn!(
                        "Transform {} failed, passing data through unmodified: {}",
                        transform_key(from, to),
                        e
                    );
                    value
                }
            },
            None => {
                log::warn!(
                    "No transform registered for {}, passing data through unmodified",
                    transform_key(from, to)
                );
                value
            }
        }
    }
}
