//! Tiles and their correspondence graph.
//!
//! Tiles live in a flat arena addressed by image index. Each tile owns its
//! model and an adjacency list of `(neighbour, correspondences)` where every
//! correspondence has the tile's own particle on the A side.

pub mod optimize;

pub use optimize::{optimize, ErrorStats, Optimization, OptimizerConfig};

use crate::model::Model;
use crate::point::PointMatch;
use crate::util::{DescRegError, DescRegResult};

/// Correspondences from one tile to a neighbour.
#[derive(Clone, Debug)]
pub struct Connection {
    pub other: usize,
    pub matches: Vec<PointMatch>,
}

/// One image's node in the optimization graph.
#[derive(Clone, Debug)]
pub struct Tile {
    model: Model,
    connections: Vec<Connection>,
}

impl Tile {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_connected(&self) -> bool {
        self.connections.iter().any(|c| !c.matches.is_empty())
    }

    pub fn num_matches(&self) -> usize {
        self.connections.iter().map(|c| c.matches.len()).sum()
    }

    /// Correspondences with the B side placed by the neighbours' current models.
    fn placed_matches(
        &self,
        models: &[&Model],
        mut accept: impl FnMut(usize) -> bool,
    ) -> Vec<PointMatch> {
        let mut out = Vec::with_capacity(self.num_matches());
        for c in self.connections.iter().filter(|c| accept(c.other)) {
            for m in &c.matches {
                let mut m = *m;
                m.b.apply(models[c.other]);
                out.push(m);
            }
        }
        out
    }

    fn add(&mut self, other: usize, matches: Vec<PointMatch>) {
        match self.connections.iter_mut().find(|c| c.other == other) {
            Some(c) => c.matches.extend(matches),
            None => self.connections.push(Connection { other, matches }),
        }
    }
}

/// Arena of tiles, one per image.
#[derive(Clone, Debug)]
pub struct TileGraph {
    tiles: Vec<Tile>,
}

impl TileGraph {
    /// Creates `num_tiles` tiles, each holding a copy of `template`.
    pub fn new(num_tiles: usize, template: &Model) -> Self {
        let tiles = (0..num_tiles)
            .map(|_| Tile {
                model: template.clone(),
                connections: Vec::new(),
            })
            .collect();
        Self { tiles }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, index: usize) -> Option<&Tile> {
        self.tiles.get(index)
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Adds the inliers of pair `(a, b)` to both tiles.
    ///
    /// Tile `a` receives the matches as given, tile `b` the flipped ones.
    /// Empty inlier lists are ignored.
    pub fn connect(&mut self, a: usize, b: usize, inliers: &[PointMatch]) -> DescRegResult<()> {
        if a >= self.tiles.len() || b >= self.tiles.len() {
            return Err(DescRegError::InvalidInput("tile index out of range"));
        }
        if a == b {
            return Err(DescRegError::InvalidInput("a tile cannot be connected to itself"));
        }
        if inliers.is_empty() {
            return Ok(());
        }
        let forward: Vec<PointMatch> = inliers
            .iter()
            .map(|m| {
                let mut m = *m;
                m.restore_coordinates();
                m
            })
            .collect();
        let backward: Vec<PointMatch> = forward.iter().map(PointMatch::flipped).collect();
        self.tiles[a].add(b, forward);
        self.tiles[b].add(a, backward);
        Ok(())
    }

    /// Indices of tiles with at least one correspondence.
    pub fn connected_tiles(&self) -> Vec<usize> {
        (0..self.tiles.len())
            .filter(|&i| self.tiles[i].is_connected())
            .collect()
    }

    /// Number of distinct correspondences in the graph.
    pub fn num_correspondences(&self) -> usize {
        self.tiles.iter().map(Tile::num_matches).sum::<usize>() / 2
    }

    /// Current models, one per tile.
    pub fn models(&self) -> Vec<Model> {
        self.tiles.iter().map(|t| t.model.clone()).collect()
    }

    fn model_refs(&self) -> Vec<&Model> {
        self.tiles.iter().map(|t| &t.model).collect()
    }

    /// Displacement of every stored correspondence under the current models.
    ///
    /// Each correspondence is stored on both of its tiles and appears twice.
    fn residuals(&self) -> Vec<f64> {
        let models = self.model_refs();
        let mut out = Vec::new();
        for tile in &self.tiles {
            for c in &tile.connections {
                for m in &c.matches {
                    let p = tile.model.apply(&m.a.local());
                    let q = models[c.other].apply(&m.b.local());
                    out.push(nalgebra::distance(&p, &q));
                }
            }
        }
        out
    }

    /// Fits tile `index` to its neighbours, restricted to those `accept` allows.
    fn fit_tile(&mut self, index: usize, accept: impl FnMut(usize) -> bool) -> DescRegResult<()> {
        let matches = self.tiles[index].placed_matches(&self.model_refs(), accept);
        let mut model = self.tiles[index].model.clone();
        model.fit(&matches)?;
        self.tiles[index].model = model;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TileGraph;
    use crate::detect::{ExtremumKind, Peak};
    use crate::model::{Model, ModelKind};
    use crate::point::{Particle, PointMatch};

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

    #[test]
    fn connections_are_symmetric() {
        let template = Model::identity(ModelKind::Rigid, 2).unwrap();
        let mut graph = TileGraph::new(3, &template);
        let m = PointMatch::new(particle(0, 1.0, 2.0), particle(5, 3.0, 4.0));
        graph.connect(0, 2, &[m, m]).unwrap();
        graph.connect(0, 1, &[]).unwrap();
        assert_eq!(graph.connected_tiles(), vec![0, 2]);
        assert_eq!(graph.num_correspondences(), 2);
        let back = &graph.tile(2).unwrap().connections()[0];
        assert_eq!(back.other, 0);
        assert_eq!(back.matches[0].a.id(), 5);
        assert!(graph.connect(1, 1, &[m]).is_err());
        assert!(graph.connect(0, 3, &[m]).is_err());
    }
}
