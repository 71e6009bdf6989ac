//! Compile-time policy options.
//!
//! `CompileOptions` is constructed once per compilation request, treated as
//! read-only thereafter, and passed by reference to the pipeline assembler
//! and to every downstream consumer. It selects which optional stages run
//! and parameterizes the cost-driven decisions in auto-fusion clustering
//! and stream scheduling.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The target TPU infrastructure. Selects among three mutually exclusive
/// stage subsets at pipeline-construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TpuTarget {
    /// No TPU support.
    #[default]
    NoTpu,

    /// Target the TPURT dialect and kernels.
    Tpurt,

    /// Target TPU kernels through the fallback path.
    TfFallback,
}

/// Data formats accepted by `force_data_format` (besides the empty string).
pub const SUPPORTED_DATA_FORMATS: &[&str] = &["NHWC", "NCHW"];

/// Compile-time policy for one compilation request.
///
/// All fields have defaults; callers override what they need and pass the
/// record by reference. Cross-field consistency is checked eagerly by
/// [`CompileOptions::validate`], which the pipeline assembler calls before
/// any stage is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Device on which stateful tensors (variables) are materialized.
    pub variable_device: String,

    /// Device assigned to ops that carry no device annotation.
    pub default_device: String,

    /// Gate for the optimizer stage set (stream formation and merging over
    /// the lowered module).
    pub enable_optimizer: bool,

    /// Prefer native kernels where implemented; if false, every op is
    /// marked for the fallback execution path.
    pub enable_native_ops: bool,

    /// Run graph-level pre-optimization before lowering begins.
    pub enable_grappler: bool,

    /// Force a data format for all layout-sensitive operations by
    /// rewriting them (inserting transposes as needed). Empty string means
    /// no forcing; otherwise one of `SUPPORTED_DATA_FORMATS`.
    pub force_data_format: String,

    /// Which TPU-specific stage subset to include.
    pub tpu_target: TpuTarget,

    /// Tag side-effect-free, constant-derived ops for one-time execution
    /// in the init phase, avoiding their cost on every run.
    pub hoist_invariant_ops: bool,

    /// Allow-list of op kinds eligible for auto-fusion clustering.
    pub auto_fusion_oplist: Vec<String>,

    /// Minimum ops per cluster for the cluster to be worth compiling.
    pub auto_fusion_min_cluster_size: usize,

    /// Max cumulative cost for a sequence to count as cheap and be
    /// executed inline. Costs are positive integers by construction, so a
    /// threshold of 1 makes every sequence expensive.
    pub cost_threshold: u64,

    /// Max cost before an inline execution sequence must be split.
    /// -1 means no limit.
    pub upper_cost_threshold: i64,

    /// Prefer merging execution streams with inter-stream data
    /// dependencies for inline execution.
    pub merge_inter_dependent_streams: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            variable_device: "/job:localhost/replica:0/task:0/device:CPU:0".to_string(),
            default_device: "/job:localhost/replica:0/task:0/device:CPU:0".to_string(),
            enable_optimizer: true,
            enable_native_ops: true,
            enable_grappler: false,
            force_data_format: String::new(),
            tpu_target: TpuTarget::NoTpu,
            hoist_invariant_ops: false,
            auto_fusion_oplist: Vec::new(),
            auto_fusion_min_cluster_size: 2,
            cost_threshold: 1,
            upper_cost_threshold: -1,
            merge_inter_dependent_streams: false,
        }
    }
}

impl CompileOptions {
    /// Check cross-field consistency.
    ///
    /// Rejects:
    /// - `cost_threshold == 0` (every sequence would be ineligible),
    /// - `auto_fusion_min_cluster_size == 0`,
    /// - an unsupported `force_data_format` string,
    /// - a finite `upper_cost_threshold` below `cost_threshold` (the two
    ///   bound the same inline-execution decision; an upper bound below
    ///   the lower bound makes the splitting policy vacuous).
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.cost_threshold == 0 {
            return Err(Error::Config(
                "cost_threshold must be >= 1 (costs are positive integers)".to_string(),
            ));
        }

        if self.auto_fusion_min_cluster_size == 0 {
            return Err(Error::Config(
                "auto_fusion_min_cluster_size must be >= 1".to_string(),
            ));
        }

        if !self.force_data_format.is_empty()
            && !SUPPORTED_DATA_FORMATS.contains(&self.force_data_format.as_str())
        {
            return Err(Error::Config(format!(
                "unsupported force_data_format '{}' (expected one of {:?})",
                self.force_data_format, SUPPORTED_DATA_FORMATS
            )));
        }

        if self.upper_cost_threshold != -1 {
            if self.upper_cost_threshold < 0 {
                return Err(Error::Config(format!(
                    "upper_cost_threshold must be -1 (unbounded) or non-negative, got {}",
                    self.upper_cost_threshold
                )));
            }
            if (self.upper_cost_threshold as u64) < self.cost_threshold {
                return Err(Error::Config(format!(
                    "upper_cost_threshold ({}) must be >= cost_threshold ({})",
                    self.upper_cost_threshold, self.cost_threshold
                )));
            }
        }

        Ok(())
    }

    /// Check if inline sequences have an upper size bound.
    pub fn has_upper_cost_bound(&self) -> bool {
        self.upper_cost_threshold != -1
    }
}
