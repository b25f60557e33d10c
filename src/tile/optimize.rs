//! Global optimization of all tile models.
//!
//! Tiles are first pre-aligned breadth-first from an anchor, each fitted to the
//! already placed neighbours. The relaxation then refits every free tile to all
//! of its neighbours in turn until the mean displacement reaches a plateau.

use crate::model::Model;
use crate::tile::TileGraph;
use crate::trace::{trace_event, trace_span};
use crate::util::{CancelToken, DescRegError, DescRegResult};
use std::collections::VecDeque;

/// Error slopes below this count as a plateau.
const SLOPE_TOLERANCE: f64 = 1e-4;

/// Global optimizer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Keep iterating while the mean displacement exceeds this.
    pub max_allowed_error: f64,
    pub max_iterations: usize,
    /// Number of iterations over which the error slope is observed.
    pub max_plateau_width: usize,
    /// Keep the first connected tile at its initial model.
    pub fix_first_tile: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_allowed_error: 10.0,
            max_iterations: 10_000,
            max_plateau_width: 200,
            fix_first_tile: true,
        }
    }
}

/// Displacement statistics over all correspondences.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Number of distinct correspondences.
    pub count: usize,
}

/// Result of [`optimize`].
#[derive(Clone, Debug)]
pub struct Optimization {
    /// One model per tile; regularized models are decomposed.
    pub models: Vec<Model>,
    pub stats: ErrorStats,
    pub iterations: usize,
    pub fixed: Option<usize>,
    /// Tiles without correspondences; they keep their initial model.
    pub unconnected: Vec<usize>,
}

fn failure(tile: usize, err: DescRegError) -> DescRegError {
    DescRegError::OptimizationFailed {
        reason: format!("tile {tile}: {err}"),
    }
}

/// Places every connected tile relative to its component's root.
fn pre_align(graph: &mut TileGraph, connected: &[usize], fixed: Option<usize>) -> DescRegResult<()> {
    let mut aligned = vec![false; graph.len()];
    for root in fixed.into_iter().chain(connected.iter().copied()) {
        if aligned[root] {
            continue;
        }
        aligned[root] = true;
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            let neighbours: Vec<usize> = graph.tiles[current]
                .connections
                .iter()
                .filter(|c| !c.matches.is_empty())
                .map(|c| c.other)
                .collect();
            for n in neighbours {
                if aligned[n] {
                    continue;
                }
                graph
                    .fit_tile(n, |other| aligned[other])
                    .map_err(|err| failure(n, err))?;
                aligned[n] = true;
                queue.push_back(n);
            }
        }
    }
    Ok(())
}

fn error_stats(graph: &TileGraph) -> ErrorStats {
    let residuals = graph.residuals();
    if residuals.is_empty() {
        return ErrorStats::default();
    }
    let sum: f64 = residuals.iter().sum();
    ErrorStats {
        mean: sum / residuals.len() as f64,
        min: residuals.iter().copied().fold(f64::INFINITY, f64::min),
        max: residuals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        count: graph.num_correspondences(),
    }
}

/// Slope of the error over the last `width` iterations.
fn wide_slope(history: &VecDeque<f64>, width: usize) -> Option<f64> {
    let last = *history.back()?;
    let idx = history.len().checked_sub(width + 1)?;
    Some((last - history[idx]) / width as f64)
}

/// Runs the relaxation; returns the number of iterations performed.
fn relax(
    graph: &mut TileGraph,
    connected: &[usize],
    fixed: Option<usize>,
    config: &OptimizerConfig,
    cancel: &CancelToken,
) -> DescRegResult<usize> {
    let width = config.max_plateau_width;
    let mut history: VecDeque<f64> = VecDeque::with_capacity(width + 2);
    let mut iteration = 0usize;
    let mut proceed = config.max_iterations > 0;
    while proceed {
        cancel.check()?;
        for &t in connected {
            if Some(t) == fixed {
                continue;
            }
            graph.fit_tile(t, |_| true).map_err(|err| failure(t, err))?;
        }
        let error = error_stats(graph).mean;
        if !error.is_finite() {
            return Err(DescRegError::OptimizationFailed {
                reason: "mean displacement is not finite".to_string(),
            });
        }
        history.push_back(error);
        if history.len() > width + 1 {
            history.pop_front();
        }

        if iteration > width {
            proceed = error > config.max_allowed_error;
            let mut d = width;
            while !proceed && d >= 1 {
                proceed |= wide_slope(&history, d).is_some_and(|s| s.abs() > SLOPE_TOLERANCE);
                d /= 2;
            }
        }
        iteration += 1;
        proceed &= iteration < config.max_iterations;
    }
    Ok(iteration)
}

/// Optimizes all tile models in place and returns the output models.
///
/// Unconnected tiles keep the model the graph was created with. A fit failure
/// or a non-finite error aborts with [`DescRegError::OptimizationFailed`].
pub fn optimize(
    graph: &mut TileGraph,
    config: &OptimizerConfig,
    cancel: &CancelToken,
) -> DescRegResult<Optimization> {
    let _span = trace_span!("global_optimization", tiles = graph.len()).entered();
    let connected = graph.connected_tiles();
    let unconnected: Vec<usize> = (0..graph.len())
        .filter(|i| connected.binary_search(i).is_err())
        .collect();
    for &tile in &unconnected {
        trace_event!("tile_unconnected", tile = tile);
    }
    let fixed = if config.fix_first_tile {
        connected.first().copied()
    } else {
        None
    };

    let iterations = if connected.is_empty() {
        0
    } else {
        pre_align(graph, &connected, fixed)?;
        relax(graph, &connected, fixed, config, cancel)?
    };

    let stats = error_stats(graph);
    trace_event!(
        "optimization_finished",
        iterations = iterations,
        mean_error = stats.mean,
        min_error = stats.min,
        max_error = stats.max,
        correspondences = stats.count
    );
    Ok(Optimization {
        models: graph.tiles.iter().map(|t| t.model.decomposed()).collect(),
        stats,
        iterations,
        fixed,
        unconnected,
    })
}

#[cfg(test)]
mod tests {
    use super::{optimize, wide_slope, OptimizerConfig};
    use crate::detect::{ExtremumKind, Peak};
    use crate::model::{Model, ModelKind};
    use crate::point::{Particle, PointMatch};
    use crate::tile::TileGraph;
    use crate::util::{CancelToken, DescRegError};
    use nalgebra::Point3;
    use std::collections::VecDeque;

    fn particle(id: usize, x: f64, y: f64) -> Particle {
        let peak = Peak {
            position: [0, 0, 0],
            offset: [x, y, 0.0],
            value: 1.0,
            kind: ExtremumKind::Maximum,
            valid: true,
        };
        Particle::new(id, peak, 1.0, 2)
    }

    const POINTS: [(f64, f64); 6] = [
        (0.0, 0.0),
        (40.0, 3.0),
        (12.0, 55.0),
        (70.0, 61.0),
        (33.0, 20.0),
        (5.0, 90.0),
    ];

    /// Correspondences between tiles whose locals are offset by `da` and `db`.
    fn matches(da: (f64, f64), db: (f64, f64)) -> Vec<PointMatch> {
        POINTS
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                PointMatch::new(
                    particle(i, x - da.0, y - da.1),
                    particle(i, x - db.0, y - db.1),
                )
            })
            .collect()
    }

    #[test]
    fn chain_is_aligned_to_the_fixed_tile() {
        let template = Model::identity(ModelKind::Rigid, 2).unwrap();
        let mut graph = TileGraph::new(4, &template);
        graph.connect(0, 1, &matches((0.0, 0.0), (10.0, -5.0))).unwrap();
        graph.connect(1, 2, &matches((10.0, -5.0), (-3.0, 8.0))).unwrap();
        let result = optimize(&mut graph, &OptimizerConfig::default(), &CancelToken::new()).unwrap();

        assert_eq!(result.fixed, Some(0));
        assert_eq!(result.unconnected, vec![3]);
        assert_eq!(result.models[0], template);
        assert_eq!(result.models[3], template);
        let p = result.models[1].apply(&Point3::new(0.0, 0.0, 0.0));
        assert!((p - Point3::new(10.0, -5.0, 0.0)).norm() < 1e-6);
        let q = result.models[2].apply(&Point3::new(0.0, 0.0, 0.0));
        assert!((q - Point3::new(-3.0, 8.0, 0.0)).norm() < 1e-6);
        assert!(result.stats.mean < 1e-6);
        assert_eq!(result.stats.count, 12);
    }

    #[test]
    fn empty_graph_returns_templates() {
        let template = Model::identity(ModelKind::Affine, 3).unwrap();
        let mut graph = TileGraph::new(2, &template);
        let result = optimize(&mut graph, &OptimizerConfig::default(), &CancelToken::new()).unwrap();
        assert_eq!(result.iterations, 0);
        assert_eq!(result.fixed, None);
        assert!(result.models.iter().all(|m| *m == template));
    }

    #[test]
    fn cancellation_aborts() {
        let template = Model::identity(ModelKind::Translation, 2).unwrap();
        let mut graph = TileGraph::new(2, &template);
        graph.connect(0, 1, &matches((0.0, 0.0), (1.0, 1.0))).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = optimize(&mut graph, &OptimizerConfig::default(), &cancel).unwrap_err();
        assert_eq!(err, DescRegError::Cancelled);
    }

    #[test]
    fn degenerate_tile_fails_the_optimization() {
        // A single correspondence cannot determine an affine model.
        let template = Model::identity(ModelKind::Affine, 2).unwrap();
        let mut graph = TileGraph::new(2, &template);
        graph.connect(0, 1, &matches((0.0, 0.0), (1.0, 1.0))[..1]).unwrap();
        let err = optimize(&mut graph, &OptimizerConfig::default(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, DescRegError::OptimizationFailed { .. }));
    }

    #[test]
    fn wide_slope_uses_the_window() {
        let history: VecDeque<f64> = [10.0, 8.0, 4.0].into_iter().collect();
        assert_eq!(wide_slope(&history, 2), Some(-3.0));
        assert_eq!(wide_slope(&history, 1), Some(-4.0));
        assert_eq!(wide_slope(&history, 3), None);
    }
}
