use clap::Parser;
use descreg::image::io::{load_gray_stack, load_gray_volume};
use descreg::pipeline::config::DEFAULT_MAX_ROI_ITERATIONS;
use descreg::{
    reapply_series, register_series, track_brightest_peak, CancelToken, DescriptorConfig,
    DetectConfig, Localization, Model, ModelKind, ModelSpec, Normalization, OptimizerConfig,
    PairwiseConfig, RansacConfig, RegistrationConfig, RegistrationResult, RegistrationSession,
    Roi, Topology, Volume,
};
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "Descriptor-based series registration (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ModelKindConfig {
    Translation,
    Rigid,
    Similarity,
    Affine,
    Homography,
}

impl From<ModelKindConfig> for ModelKind {
    fn from(value: ModelKindConfig) -> Self {
        match value {
            ModelKindConfig::Translation => ModelKind::Translation,
            ModelKindConfig::Rigid => ModelKind::Rigid,
            ModelKindConfig::Similarity => ModelKind::Similarity,
            ModelKindConfig::Affine => ModelKind::Affine,
            ModelKindConfig::Homography => ModelKind::Homography,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LocalizationConfig {
    None,
    Quadratic,
    GaussianMask,
}

impl From<LocalizationConfig> for Localization {
    fn from(value: LocalizationConfig) -> Self {
        match value {
            LocalizationConfig::None => Localization::None,
            LocalizationConfig::Quadratic => Localization::Quadratic,
            LocalizationConfig::GaussianMask => Localization::GaussianMask,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TopologyConfig {
    AllToAll,
    WithinRange(usize),
    AllToOne,
    Consecutive,
}

impl From<TopologyConfig> for Topology {
    fn from(value: TopologyConfig) -> Self {
        match value {
            TopologyConfig::AllToAll => Topology::AllToAll,
            TopologyConfig::WithinRange(range) => Topology::WithinRange(range),
            TopologyConfig::AllToOne => Topology::AllToOne,
            TopologyConfig::Consecutive => Topology::Consecutive,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NormalizationConfig {
    PerImage,
    Global,
    Fixed { min: f32, max: f32 },
}

impl From<NormalizationConfig> for Normalization {
    fn from(value: NormalizationConfig) -> Self {
        match value {
            NormalizationConfig::PerImage => Normalization::PerImage,
            NormalizationConfig::Global => Normalization::Global,
            NormalizationConfig::Fixed { min, max } => Normalization::Fixed { min, max },
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Register,
    TrackBrightest,
    /// Reuse the models of an earlier run stored at `session_path`.
    Reapply,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectConfigJson {
    sigma: f64,
    sigma2: Option<f64>,
    threshold: f64,
    find_max: bool,
    find_min: bool,
    localization: LocalizationConfig,
    image_sigma: f64,
    max_moves: usize,
    allow_maxima_tolerance: bool,
    fit_sigma: [f64; 3],
    support_region: [usize; 3],
    fit_iterations: usize,
    max_fit_shift: f64,
    brightest_n: Option<usize>,
    normalization: NormalizationConfig,
}

impl Default for DetectConfigJson {
    fn default() -> Self {
        let cfg = DetectConfig::default();
        Self {
            sigma: cfg.sigma,
            sigma2: cfg.sigma2,
            threshold: cfg.threshold,
            find_max: cfg.find_max,
            find_min: cfg.find_min,
            localization: LocalizationConfig::Quadratic,
            image_sigma: cfg.image_sigma,
            max_moves: cfg.max_moves,
            allow_maxima_tolerance: cfg.allow_maxima_tolerance,
            fit_sigma: cfg.fit_sigma,
            support_region: cfg.support_region,
            fit_iterations: cfg.fit_iterations,
            max_fit_shift: cfg.max_fit_shift,
            brightest_n: None,
            normalization: NormalizationConfig::PerImage,
        }
    }
}

impl DetectConfigJson {
    fn to_config(&self) -> DetectConfig {
        DetectConfig {
            sigma: self.sigma,
            sigma2: self.sigma2,
            threshold: self.threshold,
            find_max: self.find_max,
            find_min: self.find_min,
            localization: self.localization.into(),
            image_sigma: self.image_sigma,
            max_moves: self.max_moves,
            allow_maxima_tolerance: self.allow_maxima_tolerance,
            fit_sigma: self.fit_sigma,
            support_region: self.support_region,
            fit_iterations: self.fit_iterations,
            max_fit_shift: self.max_fit_shift,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegularizerJson {
    kind: ModelKindConfig,
    lambda: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ModelConfigJson {
    kind: ModelKindConfig,
    regularizer: Option<RegularizerJson>,
}

impl Default for ModelConfigJson {
    fn default() -> Self {
        Self {
            kind: ModelKindConfig::Rigid,
            regularizer: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MatchConfigJson {
    num_neighbors: usize,
    redundancy: usize,
    significance: f64,
    min_similarity: f64,
    similar_orientation: bool,
    ransac_iterations: usize,
    max_epsilon: f64,
    min_inlier_ratio: f64,
    max_trust: f64,
    min_inlier_factor: f64,
    filter: bool,
    seed: Option<u64>,
    max_refinement_rounds: Option<usize>,
}

impl Default for MatchConfigJson {
    fn default() -> Self {
        let descriptor = DescriptorConfig::default();
        let ransac = RansacConfig::default();
        Self {
            num_neighbors: descriptor.num_neighbors,
            redundancy: descriptor.redundancy,
            significance: descriptor.significance,
            min_similarity: descriptor.min_similarity,
            similar_orientation: descriptor.similar_orientation,
            ransac_iterations: ransac.iterations,
            max_epsilon: ransac.max_epsilon,
            min_inlier_ratio: ransac.min_inlier_ratio,
            max_trust: ransac.max_trust,
            min_inlier_factor: ransac.min_inlier_factor,
            filter: ransac.filter,
            seed: ransac.seed,
            max_refinement_rounds: None,
        }
    }
}

impl MatchConfigJson {
    fn to_config(&self) -> PairwiseConfig {
        PairwiseConfig {
            descriptor: DescriptorConfig {
                num_neighbors: self.num_neighbors,
                redundancy: self.redundancy,
                significance: self.significance,
                min_similarity: self.min_similarity,
                similar_orientation: self.similar_orientation,
            },
            ransac: RansacConfig {
                iterations: self.ransac_iterations,
                max_epsilon: self.max_epsilon,
                min_inlier_ratio: self.min_inlier_ratio,
                max_trust: self.max_trust,
                min_inlier_factor: self.min_inlier_factor,
                filter: self.filter,
                seed: self.seed,
            },
            max_refinement_rounds: self.max_refinement_rounds,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OptimizerConfigJson {
    max_allowed_error: f64,
    max_iterations: usize,
    max_plateau_width: usize,
    fix_first_tile: bool,
}

impl Default for OptimizerConfigJson {
    fn default() -> Self {
        let cfg = OptimizerConfig::default();
        Self {
            max_allowed_error: cfg.max_allowed_error,
            max_iterations: cfg.max_iterations,
            max_plateau_width: cfg.max_plateau_width,
            fix_first_tile: cfg.fix_first_tile,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoiJson {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    mode: Mode,
    /// One entry per time point; several paths form a z-stack.
    images: Vec<Vec<String>>,
    calibration: [f64; 3],
    output_path: Option<String>,
    correspondence_dir: Option<String>,
    /// Models of a run are written here when `store_models` is set and read
    /// back in `reapply` mode.
    session_path: Option<String>,
    store_points: bool,
    store_models: bool,
    topology: TopologyConfig,
    roi: Option<RoiJson>,
    max_roi_iterations: usize,
    parallel: bool,
    threads: Option<usize>,
    detect: DetectConfigJson,
    model: ModelConfigJson,
    #[serde(rename = "match")]
    match_cfg: MatchConfigJson,
    optimizer: OptimizerConfigJson,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Register,
            images: Vec::new(),
            calibration: [1.0; 3],
            output_path: None,
            correspondence_dir: None,
            session_path: None,
            store_points: false,
            store_models: true,
            topology: TopologyConfig::WithinRange(5),
            roi: None,
            max_roi_iterations: DEFAULT_MAX_ROI_ITERATIONS,
            parallel: true,
            threads: None,
            detect: DetectConfigJson::default(),
            model: ModelConfigJson::default(),
            match_cfg: MatchConfigJson::default(),
            optimizer: OptimizerConfigJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ModelRecord {
    image: usize,
    /// Row-major homogeneous matrix acting on raw voxel coordinates.
    matrix: [[f64; 4]; 4],
}

impl ModelRecord {
    fn new(image: usize, model: &Model) -> Self {
        Self {
            image,
            matrix: rows(&model.to_homogeneous()),
        }
    }
}

fn rows(h: &Matrix4<f64>) -> [[f64; 4]; 4] {
    let mut matrix = [[0.0; 4]; 4];
    for (r, row) in matrix.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = h[(r, c)];
        }
    }
    matrix
}

/// Models of a finished run in stretch-corrected coordinates.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    num_dimensions: usize,
    models: Vec<[[f64; 4]; 4]>,
}

impl SessionFile {
    fn from_session(session: &RegistrationSession) -> Self {
        Self {
            num_dimensions: session.num_dimensions(),
            models: session
                .models()
                .iter()
                .map(|m| rows(&m.to_homogeneous()))
                .collect(),
        }
    }

    fn into_session(self) -> Result<RegistrationSession, Box<dyn std::error::Error>> {
        let models = self
            .models
            .iter()
            .map(|m| {
                let h = Matrix4::from_fn(|r, c| m[r][c]);
                Model::from_homogeneous(&h, self.num_dimensions)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut session = RegistrationSession::new();
        session.store(&models, self.num_dimensions);
        Ok(session)
    }
}

#[derive(Debug, Serialize)]
struct PairRecord {
    a: usize,
    b: usize,
    inliers: usize,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatsRecord {
    mean: f64,
    min: f64,
    max: f64,
    count: usize,
}

#[derive(Debug, Serialize)]
struct Output {
    models: Vec<ModelRecord>,
    pairs: Vec<PairRecord>,
    stats: Option<StatsRecord>,
    fixed: Option<usize>,
    unconnected: Vec<usize>,
    roi_iterations: usize,
    /// Subpixel peak locations per image, written when `store_points` is set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    peaks: Vec<Vec<[f64; 3]>>,
}

impl From<&RegistrationResult> for Output {
    fn from(result: &RegistrationResult) -> Self {
        let models = result
            .voxel_models()
            .iter()
            .enumerate()
            .map(|(i, m)| ModelRecord::new(i, m))
            .collect();
        let pairs = result
            .pairs
            .iter()
            .map(|p| PairRecord {
                a: p.pair.a,
                b: p.pair.b,
                inliers: p.inliers().len(),
                error: p.outcome.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        Self {
            models,
            pairs,
            stats: Some(StatsRecord {
                mean: result.stats.mean,
                min: result.stats.min,
                max: result.stats.max,
                count: result.stats.count,
            }),
            fixed: result.fixed,
            unconnected: result.unconnected.clone(),
            roi_iterations: result.roi_iterations,
            peaks: result
                .peaks
                .iter()
                .map(|image| image.iter().map(|p| p.location()).collect())
                .collect(),
        }
    }
}

fn load_images(config: &Config) -> Result<Vec<Volume>, Box<dyn std::error::Error>> {
    let mut images = Vec::with_capacity(config.images.len());
    for (i, paths) in config.images.iter().enumerate() {
        let volume = match paths.as_slice() {
            [] => return Err(format!("image {i} has no paths").into()),
            [single] => load_gray_volume(single)?,
            stack => load_gray_stack(stack)?,
        };
        images.push(volume.with_calibration(config.calibration)?);
    }
    Ok(images)
}

fn registration_config(config: &Config, num_dimensions: usize) -> RegistrationConfig {
    let mut model = ModelSpec::new(config.model.kind.into(), num_dimensions);
    if let Some(reg) = &config.model.regularizer {
        model = model.regularized(reg.kind.into(), reg.lambda);
    }
    RegistrationConfig {
        detect: config.detect.to_config(),
        normalization: config.detect.normalization.into(),
        model,
        pairwise: config.match_cfg.to_config(),
        optimizer: OptimizerConfig {
            max_allowed_error: config.optimizer.max_allowed_error,
            max_iterations: config.optimizer.max_iterations,
            max_plateau_width: config.optimizer.max_plateau_width,
            fix_first_tile: config.optimizer.fix_first_tile,
        },
        topology: config.topology.into(),
        brightest_n: config.detect.brightest_n,
        max_roi_iterations: config.max_roi_iterations,
        store_points: config.store_points,
        store_models: config.store_models,
        roi: config
            .roi
            .as_ref()
            .map(|r| Roi::new(r.x, r.y, r.width, r.height)),
        correspondence_dir: config.correspondence_dir.as_ref().map(PathBuf::from),
        parallel: config.parallel,
        threads: config.threads,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("descreg=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.images.len() < 2 {
        return Err("at least two images must be listed in the config".into());
    }

    let images = load_images(&config)?;
    let num_dimensions = images[0].num_dimensions();
    let output = match config.mode {
        Mode::Register => {
            let reg_config = registration_config(&config, num_dimensions);
            let mut session = RegistrationSession::new();
            let result = register_series(&images, &reg_config, &mut session, &CancelToken::new())?;
            tracing::info!(
                inliers = result.num_inliers(),
                mean_error = result.stats.mean,
                "registration finished"
            );
            if let (true, Some(path)) = (config.store_models, &config.session_path) {
                let file = SessionFile::from_session(&session);
                fs::write(path, serde_json::to_string_pretty(&file)?)?;
            }
            Output::from(&result)
        }
        Mode::Reapply => {
            let path = config
                .session_path
                .as_ref()
                .ok_or("reapply mode needs session_path")?;
            let file: SessionFile = serde_json::from_str(&fs::read_to_string(path)?)?;
            let session = file.into_session()?;
            let result = reapply_series(&images, &session)?;
            tracing::info!(models = result.models.len(), "models reapplied");
            Output::from(&result)
        }
        Mode::TrackBrightest => {
            let models = track_brightest_peak(
                &images,
                &config.detect.to_config(),
                config.detect.normalization.into(),
            )?;
            let z_stretch = images[0].z_stretch();
            Output {
                models: models
                    .iter()
                    .enumerate()
                    .map(|(i, m)| ModelRecord::new(i, &m.with_axial_scaling(z_stretch)))
                    .collect(),
                pairs: Vec::new(),
                stats: None,
                fixed: Some(0),
                unconnected: Vec::new(),
                roi_iterations: 0,
                peaks: Vec::new(),
            }
        }
    };

    let json = serde_json::to_string_pretty(&output)?;
    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
