use descreg::tile::{optimize, TileGraph};
use descreg::{
    detect_peaks, pairwise_matching, CancelToken, DetectConfig, Model, ModelKind,
    OptimizerConfig, PairwiseConfig, Particle, Peak, PointMatch, Volume,
};
use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

/// Seeded random points at least `spacing` apart inside `extent`.
fn make_points(n: usize, extent: f64, spacing: f64) -> Vec<(f64, f64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut points: Vec<(f64, f64)> = Vec::with_capacity(n);
    while points.len() < n {
        let p = (
            rng.random_range(12.0..extent - 12.0),
            rng.random_range(12.0..extent - 12.0),
        );
        if points.iter().all(|q| (p.0 - q.0).hypot(p.1 - q.1) >= spacing) {
            points.push(p);
        }
    }
    points
}

fn make_image(points: &[(f64, f64)], width: usize, height: usize) -> Volume {
    let mut data = vec![0.0f32; width * height];
    for &(cx, cy) in points {
        let x0 = (cx - 10.0).max(0.0) as usize;
        let x1 = ((cx + 10.0) as usize).min(width - 1);
        let y0 = (cy - 10.0).max(0.0) as usize;
        let y1 = ((cy + 10.0) as usize).min(height - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                data[y * width + x] += (-d2 / 8.0).exp() as f32;
            }
        }
    }
    Volume::new_2d(data, width, height).unwrap()
}

fn particles(points: &[(f64, f64)], angle: f64, shift: (f64, f64)) -> Vec<Particle> {
    let (s, c) = angle.sin_cos();
    let peaks: Vec<Peak> = points
        .iter()
        .map(|&(x, y)| Peak::from_location([c * x - s * y + shift.0, s * x + c * y + shift.1, 0.0], 1.0))
        .collect();
    Particle::from_peaks(&peaks, 1.0, 2)
}

fn bench_detection(c: &mut Criterion) {
    let points = make_points(300, 512.0, 18.0);
    let image = make_image(&points, 512, 512);
    let cfg = DetectConfig::default();
    c.bench_function("dog_detect_512x512_300_blobs", |b| {
        b.iter(|| black_box(detect_peaks(&image, &cfg).unwrap()));
    });
}

fn bench_pairwise(c: &mut Criterion) {
    let points = make_points(300, 512.0, 18.0);
    let a = particles(&points, 0.0, (0.0, 0.0));
    let b = particles(&points, 0.2, (12.0, -7.0));
    let template = Model::identity(ModelKind::Rigid, 2).unwrap();
    let cfg = PairwiseConfig::default();
    c.bench_function("pairwise_rigid_300_points", |bench| {
        bench.iter(|| black_box(pairwise_matching(&a, &b, &template, &cfg).unwrap()));
    });
}

fn bench_optimize(c: &mut Criterion) {
    let points = make_points(36, 200.0, 18.0);
    let template = Model::identity(ModelKind::Affine, 2).unwrap();
    let num_tiles = 16;
    let mut base = TileGraph::new(num_tiles, &template);
    for t in 1..num_tiles {
        let prev = particles(&points, 0.01 * (t - 1) as f64, (3.0 * (t - 1) as f64, 0.0));
        let next = particles(&points, 0.01 * t as f64, (3.0 * t as f64, 0.0));
        let matches: Vec<PointMatch> = next
            .into_iter()
            .zip(prev)
            .map(|(n, p)| PointMatch::new(n, p))
            .collect();
        base.connect(t, t - 1, &matches).unwrap();
    }
    let cfg = OptimizerConfig::default();
    let cancel = CancelToken::new();
    c.bench_function("optimize_affine_chain_16_tiles", |b| {
        b.iter(|| {
            let mut graph = base.clone();
            black_box(optimize(&mut graph, &cfg, &cancel).unwrap())
        });
    });
}

criterion_group!(benches, bench_detection, bench_pairwise, bench_optimize);
criterion_main!(benches);
