//! Tab-separated correspondence dumps.
//!
//! Each accepted correspondence becomes one line `Ax Ay [Az] Bx By [Bz]`, the
//! A point mapped through the pair model and both points with the axial
//! stretch removed. Every pair gets its own `"{a}-{b}.txt"` file; all lines are
//! also appended to a shared `_all.txt`. Dumping is best effort and never
//! fails a match.

use crate::model::Model;
use crate::point::PointMatch;
use crate::trace::trace_warn;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the aggregate file inside the dump directory.
pub const AGGREGATE_FILE: &str = "_all.txt";

/// Shared writer for correspondence dumps, safe to use from several workers.
#[derive(Debug)]
pub struct CorrespondenceWriter {
    dir: PathBuf,
    aggregate: Mutex<Option<BufWriter<File>>>,
}

impl CorrespondenceWriter {
    /// Creates the directory if needed and opens the aggregate file.
    ///
    /// A failure to open the aggregate is logged; per-pair files are still
    /// attempted.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let aggregate = std::fs::create_dir_all(&dir)
            .and_then(|_| File::create(dir.join(AGGREGATE_FILE)))
            .map(BufWriter::new);
        let aggregate = match aggregate {
            Ok(w) => Some(w),
            Err(err) => {
                trace_warn!("cannot open correspondence dump in {}: {}", dir.display(), err);
                None
            }
        };
        Self {
            dir,
            aggregate: Mutex::new(aggregate),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the inliers of pair `(a, b)` under `model`.
    pub fn write_pair(&self, a: usize, b: usize, model: &Model, inliers: &[PointMatch]) {
        let text = format_correspondences(model, inliers);
        let path = self.dir.join(format!("{a}-{b}.txt"));
        if let Err(err) = std::fs::write(&path, &text) {
            trace_warn!("cannot write {}: {}", path.display(), err);
        }
        let mut guard = match self.aggregate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(writer) = guard.as_mut() {
            if let Err(err) = writer.write_all(text.as_bytes()).and_then(|_| writer.flush()) {
                trace_warn!("cannot append to {}: {}", AGGREGATE_FILE, err);
            }
        }
    }

    /// Flushes the aggregate file.
    pub fn finish(self) -> io::Result<()> {
        let inner = match self.aggregate.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        match inner {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Renders correspondences as dump lines.
pub fn format_correspondences(model: &Model, inliers: &[PointMatch]) -> String {
    let mut out = String::new();
    for m in inliers {
        let mut m = *m;
        m.restore_coordinates();
        m.apply(model);
        let columns = m.a.num_dimensions().clamp(2, 3);
        let a = m.a.world_unstretched();
        let b = m.b.world_unstretched();
        let fields: Vec<String> = a[..columns]
            .iter()
            .chain(&b[..columns])
            .map(f64::to_string)
            .collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{format_correspondences, CorrespondenceWriter, AGGREGATE_FILE};
    use crate::detect::{ExtremumKind, Peak};
    use crate::model::Model;
    use crate::point::{Particle, PointMatch};
    use nalgebra::Vector3;

    fn particle(id: usize, loc: [f64; 3], ndim: usize, z_stretch: f64) -> Particle {
        let peak = Peak {
            position: [0, 0, 0],
            offset: loc,
            value: 1.0,
            kind: ExtremumKind::Maximum,
            valid: true,
        };
        Particle::new(id, peak, z_stretch, ndim)
    }

    #[test]
    fn lines_hold_mapped_a_then_b() {
        let m = PointMatch::new(
            particle(0, [1.0, 2.0, 0.0], 2, 1.0),
            particle(0, [4.0, 6.0, 0.0], 2, 1.0),
        );
        let model = Model::translation(2, Vector3::new(3.0, 4.0, 0.0));
        assert_eq!(format_correspondences(&model, &[m]), "4\t6\t4\t6\n");
    }

    #[test]
    fn three_dimensional_lines_remove_stretch() {
        let m = PointMatch::new(
            particle(0, [1.0, 1.0, 2.0], 3, 2.5),
            particle(0, [1.0, 1.0, 3.0], 3, 2.5),
        );
        let model = Model::translation(3, Vector3::new(0.0, 0.0, 0.0));
        let line = format_correspondences(&model, &[m]);
        let fields: Vec<f64> = line.trim().split('\t').map(|f| f.parse().unwrap()).collect();
        assert_eq!(fields.len(), 6);
        assert!((fields[2] - 2.0).abs() < 1e-12);
        assert!((fields[5] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn writer_creates_pair_and_aggregate_files() {
        let dir = std::env::temp_dir().join(format!("descreg-dump-{}", std::process::id()));
        let writer = CorrespondenceWriter::new(&dir);
        let m = PointMatch::new(
            particle(0, [0.0, 0.0, 0.0], 2, 1.0),
            particle(0, [1.0, 0.0, 0.0], 2, 1.0),
        );
        let model = Model::translation(2, Vector3::new(1.0, 0.0, 0.0));
        writer.write_pair(0, 1, &model, &[m]);
        writer.write_pair(0, 2, &model, &[m, m]);
        writer.finish().unwrap();
        let pair = std::fs::read_to_string(dir.join("0-2.txt")).unwrap();
        assert_eq!(pair.lines().count(), 2);
        let all = std::fs::read_to_string(dir.join(AGGREGATE_FILE)).unwrap();
        assert_eq!(all.lines().count(), 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
