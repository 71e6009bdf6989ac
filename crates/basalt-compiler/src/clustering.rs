//! Auto-fusion clustering and the cost policy.
//!
//! All decisions here are pure functions of the graph and the read-only
//! `CompileOptions`: which ops may be clustered for joint compilation, how
//! expensive a sequence is, whether it may run inline, and when a sequence
//! must be split or two streams may merge.

use basalt_core::{CompileOptions, Function, OpId, Result};

use std::collections::HashMap;

/// A contiguous group of ops selected for joint compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Member ops, in topological order.
    pub ops: Vec<OpId>,

    /// Cumulative cost of the members.
    pub cost: u64,
}

/// Cost of a single op. Costs are positive integers by construction, so
/// `cost_threshold = 1` marks every sequence expensive.
pub fn op_cost(_op: &basalt_core::OpNode) -> u64 {
    1
}

/// A sequence is cheap (eligible for inline execution) when its cumulative
/// cost is below the threshold.
pub fn is_cheap(cost: u64, options: &CompileOptions) -> bool {
    cost < options.cost_threshold
}

/// A sequence must be split when an upper bound is configured and the
/// cumulative cost exceeds it. `upper_cost_threshold = -1` never splits.
pub fn must_split(cumulative: u64, options: &CompileOptions) -> bool {
    options.has_upper_cost_bound() && cumulative > options.upper_cost_threshold as u64
}

/// Check the allow-list for clustering eligibility.
pub fn is_cluster_eligible(kind: &str, options: &CompileOptions) -> bool {
    options.auto_fusion_oplist.iter().any(|k| k == kind)
}

/// Group eligible ops into clusters of def-use-connected runs.
///
/// Walks the function in topological order, extending the current cluster
/// while each eligible op consumes a value produced inside it. Clusters
/// below `auto_fusion_min_cluster_size` are not worth compiling and are
/// discarded.
pub fn form_clusters(function: &Function, options: &CompileOptions) -> Result<Vec<Cluster>> {
    let mut clusters = Vec::new();
    let mut current: Vec<OpId> = Vec::new();
    let mut current_cost = 0u64;

    let mut flush = |ops: &mut Vec<OpId>, cost: &mut u64, clusters: &mut Vec<Cluster>| {
        if ops.len() >= options.auto_fusion_min_cluster_size {
            clusters.push(Cluster {
                ops: std::mem::take(ops),
                cost: *cost,
            });
        } else {
            ops.clear();
        }
        *cost = 0;
    };

    for op_id in function.topological_order() {
        let op = function.op(op_id)?;

        if !is_cluster_eligible(&op.kind, options) {
            flush(&mut current, &mut current_cost, &mut clusters);
            continue;
        }

        let connected = current.is_empty()
            || op.inputs.iter().any(|&input| {
                function
                    .producer(input)
                    .map(|p| current.contains(&p))
                    .unwrap_or(false)
            });
        if !connected {
            flush(&mut current, &mut current_cost, &mut clusters);
        }

        current_cost += op_cost(op);
        current.push(op_id);
    }
    flush(&mut current, &mut current_cost, &mut clusters);

    Ok(clusters)
}

/// Decompose a function into execution streams.
///
/// A stream is an independent sequence of ops with internal data
/// dependencies. An op joins its producer's stream when it is that
/// producer's only consumer (a linear chain); otherwise it starts a new
/// stream.
pub fn form_streams(function: &Function) -> Result<Vec<Vec<OpId>>> {
    let mut streams: Vec<Vec<OpId>> = Vec::new();
    let mut stream_of: HashMap<OpId, usize> = HashMap::new();

    for op_id in function.topological_order() {
        let op = function.op(op_id)?;

        let chain_predecessor = op.inputs.iter().find_map(|&input| {
            let producer = function.producer(input)?;
            if function.value_consumers(input).len() == 1 && stream_of.contains_key(&producer) {
                Some(producer)
            } else {
                None
            }
        });

        match chain_predecessor {
            Some(producer) => {
                let stream = stream_of[&producer];
                streams[stream].push(op_id);
                stream_of.insert(op_id, stream);
            }
            None => {
                stream_of.insert(op_id, streams.len());
                streams.push(vec![op_id]);
            }
        }
    }

    Ok(streams)
}

/// Merge data-dependent streams for inline execution, when the policy
/// allows it and the merged cost does not trip the split bound.
pub fn merge_dependent_streams(
    function: &Function,
    mut streams: Vec<Vec<OpId>>,
    options: &CompileOptions,
) -> Result<Vec<Vec<OpId>>> {
    if !options.merge_inter_dependent_streams {
        return Ok(streams);
    }

    let cost_of = |stream: &[OpId]| -> Result<u64> {
        stream
            .iter()
            .map(|&id| function.op(id).map(op_cost))
            .sum::<Result<u64>>()
    };

    // One forward sweep: each stream tries to absorb the next stream that
    // depends on it.
    let mut i = 0;
    while i < streams.len() {
        let mut merged_any = false;

        for j in (i + 1)..streams.len() {
            let depends = streams[j].iter().any(|&consumer| {
                function
                    .op(consumer)
                    .map(|op| {
                        op.inputs.iter().any(|&input| {
                            function
                                .producer(input)
                                .map(|p| streams[i].contains(&p))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            });
            if !depends {
                continue;
            }

            let combined = cost_of(&streams[i])? + cost_of(&streams[j])?;
            if must_split(combined, options) {
                continue;
            }

            let absorbed = streams.remove(j);
            streams[i].extend(absorbed);
            merged_any = true;
            break;
        }

        if !merged_any {
            i += 1;
        }
    }

    Ok(streams)
}
