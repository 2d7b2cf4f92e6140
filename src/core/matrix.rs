//! Matrix expansion for fanned-out job instances.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One concrete parameterization: axis name → value, in axis declaration order.
pub type MatrixValues = IndexMap<String, String>;

/// Declared matrix of a job template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSpec {
    /// Named axes in declaration order
    pub axes: IndexMap<String, Vec<String>>,
    /// Extra combinations appended after the product
    pub include: Vec<MatrixValues>,
    /// Partial combinations removed from the product
    pub exclude: Vec<MatrixValues>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
}

impl MatrixSpec {
    pub fn new(axes: IndexMap<String, Vec<String>>) -> Self {
        Self {
            axes,
            include: Vec::new(),
            exclude: Vec::new(),
            fail_fast: true,
            max_parallel: None,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into its ordered combinations.
    ///
    /// No matrix means one implicit, unparameterized instance. The first
    /// declared axis varies slowest. An empty axis empties the product.
    pub fn expand(matrix: Option<&MatrixSpec>) -> Vec<MatrixValues> {
        let Some(matrix) = matrix else {
            return vec![MatrixValues::new()];
        };

        // An include-only matrix has no product to start from
        let mut combinations = if matrix.axes.is_empty() {
            Vec::new()
        } else {
            Self::generate_combinations(&matrix.axes)
        };

        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| Self::matches_partial(combo, exclude))
        });

        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        combinations
    }

    fn generate_combinations(axes: &IndexMap<String, Vec<String>>) -> Vec<MatrixValues> {
        let mut result = vec![MatrixValues::new()];

        for (axis, values) in axes {
            let mut next = Vec::with_capacity(result.len() * values.len());

            for combo in &result {
                for value in values {
                    let mut extended = combo.clone();
                    extended.insert(axis.clone(), value.clone());
                    next.push(extended);
                }
            }

            result = next;
        }

        result
    }

    fn matches_partial(combo: &MatrixValues, partial: &MatrixValues) -> bool {
        partial
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    /// Instance name shown in reports: `check (python=3.12, os=linux)`
    pub fn display_name(template: &str, values: &MatrixValues) -> String {
        if values.is_empty() {
            return template.to_string();
        }

        let parts: Vec<String> = values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        format!("{} ({})", template, parts.join(", "))
    }
}
