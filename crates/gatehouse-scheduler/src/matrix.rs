//! Matrix expansion for parallel job variants.

use gatehouse_core::pipeline::{MatrixAxes, Variant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("matrix axis '{0}' has no values")]
    EmptyAxis(String),
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand axes into the cartesian product of their values.
    ///
    /// Axes combine in declaration order with the last axis varying
    /// fastest. No axes yields a single empty variant.
    pub fn expand(&self, axes: Option<&MatrixAxes>) -> Result<Vec<Variant>, MatrixError> {
        let mut result = vec![Variant::empty()];

        let Some(axes) = axes else {
            return Ok(result);
        };

        for axis in axes.iter() {
            if axis.values.is_empty() {
                return Err(MatrixError::EmptyAxis(axis.name.clone()));
            }

            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for combo in &result {
                for value in &axis.values {
                    next.push(combo.clone().with(axis.name.clone(), value));
                }
            }
            result = next;
        }

        Ok(result)
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
