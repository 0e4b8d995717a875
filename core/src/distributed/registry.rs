//! Named operations that workers can run.
//!
//! Workers never receive code. The coordinator names an operation, and each worker looks the
//! name up in its own [`OpRegistry`]. A registry is fixed when the cluster starts; register
//! custom operations on it before handing it to the cluster.
//!
//! ## Built-in operations
//!
//! | name         | operands | params   | result                  |
//! |--------------|----------|----------|-------------------------|
//! | `add`        | 2        |          | `a + b`                 |
//! | `sub`        | 2        |          | `a - b`                 |
//! | `mul`        | 2        |          | `a * b`                 |
//! | `div`        | 2        |          | `a / b`                 |
//! | `scale`      | 1        | `factor` | `a * factor`            |
//! | `offset`     | 1        | `value`  | `a + value`             |
//! | `sub_scalar` | 1        | `value`  | `a - value`             |
//! | `div_scalar` | 1        | `value`  | `a / value`             |
//! | `neg`        | 1        |          | `-a`, signed only       |
//! | `abs`        | 1        |          | `\|a\|`                 |
//! | `sqrt`       | 1        |          | `√a`, floats only       |
//! | `exp`        | 1        |          | `eᵃ`, floats only       |
//! | `copy`       | 1        |          | `a`                     |
//! | `add_assign` | 2        |          | none, `a += b` in place |
//! | `fill`       | 1        | `value`  | none, `a = value`       |
//!
//! Reducers: `sum`, `prod`, `min`, `max`.

use crate::distributed::command::Params;
use crate::error::{Error, Result};
use crate::tensor::{Element, ReduceOp, Tensor, TensorError};
use std::collections::HashMap;
use std::sync::Arc;

/// A worker-side operation.
///
/// Operands are the worker's local arrays, in call order; changes made to them are kept. The
/// returned array, if any, becomes the result.
pub type OpFn<T> = Arc<dyn Fn(&mut [Tensor<T>], &Params) -> Result<Option<Tensor<T>>> + Send + Sync>;

/// A worker-side reducer: collapses a local array to one value.
pub type ReducerFn<T> = Arc<dyn Fn(&Tensor<T>) -> Result<T> + Send + Sync>;

pub struct OpRegistry<T> {
    ops: HashMap<String, OpFn<T>>,
    reducers: HashMap<String, ReducerFn<T>>,
}

impl<T: Element> Default for OpRegistry<T> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl<T: Element> OpRegistry<T> {
    /// A registry without any operation.
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
            reducers: HashMap::new(),
        }
    }

    /// A registry holding the built-in operations and reducers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register_binary("add", |a, b| a + b);
        registry.register_binary("sub", |a, b| a - b);
        registry.register_binary("mul", |a, b| a * b);
        registry.register_binary("div", |a, b| a / b);

        registry.register("scale", |operands, params| {
            let factor = element(params.require("scale", "factor")?)?;
            let [a] = arity::<T, 1>("scale", operands)?;
            Ok(Some(a.map(|x| x * factor)))
        });
        registry.register("offset", |operands, params| {
            let value = element(params.require("offset", "value")?)?;
            let [a] = arity::<T, 1>("offset", operands)?;
            Ok(Some(a.map(|x| x + value)))
        });
        registry.register("sub_scalar", |operands, params| {
            let value = element(params.require("sub_scalar", "value")?)?;
            let [a] = arity::<T, 1>("sub_scalar", operands)?;
            Ok(Some(a.map(|x| x - value)))
        });
        registry.register("div_scalar", |operands, params| {
            let value = element::<T>(params.require("div_scalar", "value")?)?;
            if !T::DTYPE.is_float() && value == T::zero() {
                return Err(TensorError::Unsupported(format!(
                    "integer division by zero on {}",
                    T::DTYPE
                ))
                .into());
            }
            let [a] = arity::<T, 1>("div_scalar", operands)?;
            Ok(Some(a.map(|x| x / value)))
        });
        registry.register("neg", |operands, _| {
            if !T::DTYPE.is_signed() {
                return Err(TensorError::Unsupported(format!("neg of {}", T::DTYPE)).into());
            }
            let [a] = arity::<T, 1>("neg", operands)?;
            Ok(Some(a.map(|x| T::zero() - x)))
        });
        registry.register("abs", |operands, _| {
            let [a] = arity::<T, 1>("abs", operands)?;
            Ok(Some(a.map(|x| if x < T::zero() { T::zero() - x } else { x })))
        });
        registry.register_float("sqrt", f64::sqrt);
        registry.register_float("exp", f64::exp);
        registry.register("copy", |operands, _| {
            let [a] = arity::<T, 1>("copy", operands)?;
            Ok(Some(a.clone()))
        });
        registry.register("add_assign", |operands, _| {
            let [a, b] = arity::<T, 2>("add_assign", operands)?;
            *a = (&*a + &*b)?;
            Ok(None)
        });
        registry.register("fill", |operands, params| {
            let value = element(params.require("fill", "value")?)?;
            let [a] = arity::<T, 1>("fill", operands)?;
            a.fill_all(value);
            Ok(None)
        });

        for op in [ReduceOp::Sum, ReduceOp::Prod, ReduceOp::Min, ReduceOp::Max] {
            registry.register_reducer(op.name(), move |tensor| {
                tensor.reduce(op).ok_or_else(|| {
                    TensorError::Unsupported(format!("{op} of an empty array")).into()
                })
            });
        }

        registry
    }

    /// Registers (or replaces) an operation.
    pub fn register<F>(&mut self, name: &str, op: F) -> &mut Self
    where
        F: Fn(&mut [Tensor<T>], &Params) -> Result<Option<Tensor<T>>> + Send + Sync + 'static,
    {
        self.ops.insert(name.to_string(), Arc::new(op));
        self
    }

    fn register_binary<F>(&mut self, name: &'static str, op: F)
    where
        F: Fn(&Tensor<T>, &Tensor<T>) -> crate::tensor::Result<Tensor<T>> + Send + Sync + 'static,
    {
        self.register(name, move |operands, _| {
            let [a, b] = arity::<T, 2>(name, operands)?;
            Ok(Some(op(a, b)?))
        });
    }

    /// Registers a unary operation computed in `f64`, available for float dtypes only.
    fn register_float(&mut self, name: &'static str, f: fn(f64) -> f64) {
        self.register(name, move |operands, _| {
            if !T::DTYPE.is_float() {
                return Err(TensorError::Unsupported(format!("{name} of {}", T::DTYPE)).into());
            }
            let [a] = arity::<T, 1>(name, operands)?;
            let data = a
                .data()
                .iter()
                .map(|x| x.to_f64().map(f).and_then(T::from_f64))
                .collect::<Option<Vec<T>>>()
                .ok_or_else(|| TensorError::Unsupported(format!("{name} out of range")))?;
            Ok(Some(Tensor::new(data, a.shape().to_vec())?))
        });
    }

    /// Registers (or replaces) a reducer.
    pub fn register_reducer<F>(&mut self, name: &str, reducer: F) -> &mut Self
    where
        F: Fn(&Tensor<T>) -> Result<T> + Send + Sync + 'static,
    {
        self.reducers.insert(name.to_string(), Arc::new(reducer));
        self
    }

    /// # Errors
    ///
    /// Returns `Error::UnknownOperation` if nothing is registered under `name`.
    pub fn op(&self, name: &str) -> Result<&OpFn<T>> {
        self.ops
            .get(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))
    }

    /// # Errors
    ///
    /// Returns `Error::UnknownOperation` if no reducer is registered under `name`.
    pub fn reducer(&self, name: &str) -> Result<&ReducerFn<T>> {
        self.reducers
            .get(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }
}

/// Borrows exactly `N` operands.
fn arity<'a, T, const N: usize>(
    op: &str,
    operands: &'a mut [Tensor<T>],
) -> Result<&'a mut [Tensor<T>; N]> {
    let got = operands.len();
    operands.try_into().map_err(|_| {
        Error::Contract(format!("operation {op} takes {N} operands, got {got}"))
    })
}

fn element<T: Element>(value: f64) -> Result<T> {
    T::from_f64(value).ok_or_else(|| {
        TensorError::Unsupported(format!("{value} is not representable as {}", T::DTYPE)).into()
    })
}
