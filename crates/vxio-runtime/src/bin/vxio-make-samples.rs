#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use vxio_core::particle::{ParticleCategory, ParticleRecord};
use vxio_core::store::Sample;
use vxio_core::types::{GeometryDescriptor, IdentityKey};
use vxio_store::input::{write_sample_file, SampleFileHeader, SAMPLE_FILE_SCHEMA_VERSION};

/// Writes a synthetic sample file: random-walk tracks in a cubic (or square) volume.
#[derive(Debug, Parser)]
#[command(name = "vxio-make-samples")]
struct Args {
    #[arg(long, env = "VXIO_OUTPUT")]
    output: PathBuf,

    #[arg(long, env = "VXIO_NUM_SAMPLES", default_value_t = 1000)]
    num_samples: usize,

    #[arg(long, env = "VXIO_DATA_DIM", default_value_t = 3)]
    data_dim: usize,

    /// Voxels per axis.
    #[arg(long, env = "VXIO_VOLUME", default_value_t = 192)]
    volume: u32,

    #[arg(long, env = "VXIO_MIN_VOXELS", default_value_t = 50)]
    min_voxels: usize,

    #[arg(long, env = "VXIO_MAX_VOXELS", default_value_t = 2000)]
    max_voxels: usize,

    /// Every `empty_every`-th sample has no voxels (0 disables).
    #[arg(long, env = "VXIO_EMPTY_EVERY", default_value_t = 0)]
    empty_every: usize,

    #[arg(long, env = "VXIO_NUM_CLASSES", default_value_t = 5)]
    num_classes: usize,

    /// Comma-separated keys written to the header; fields after the primary key are
    /// label (random class per track) then weights (all 1.0).
    #[arg(long, env = "VXIO_DATA_KEYS", default_value = "data,label,weight")]
    data_keys: String,

    /// Attach one particle record per track.
    #[arg(long, env = "VXIO_WITH_PARTICLES", default_value_t = false)]
    with_particles: bool,

    #[arg(long, env = "VXIO_RUN", default_value_t = 1)]
    run: u32,

    #[arg(long, env = "VXIO_SEED", default_value_t = 0)]
    seed: u64,
}

/// (pdg code, creation process) pairs the generator draws track truth from.
const TRUTH: &[(i32, &str)] = &[
    (2212, "primary"),
    (13, "primary"),
    (211, "hIoni"),
    (22, "conv"),
    (11, "compt"),
    (11, "muIoni"),
    (-11, "muMinusCaptureAtRest"),
];

fn track_particle(
    rng: &mut StdRng,
    first: &[i32],
    last: &[i32],
    deposited_energy: f32,
    npx: usize,
) -> Result<ParticleRecord> {
    let (pdg_code, process) = TRUTH[rng.gen_range(0..TRUTH.len())];
    let category = ParticleCategory::classify(pdg_code, process)?;
    let point = |c: &[i32]| [c[0] as f32, c[1] as f32, c.get(2).copied().unwrap_or(0) as f32];
    let start = point(first);
    let end = point(last);
    let delta = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
    let norm = delta.iter().map(|d| d * d).sum::<f32>().sqrt().max(f32::EPSILON);
    let energy = rng.gen_range(10.0f32..1000.0);
    Ok(ParticleRecord {
        particle_idx: 0,
        primary: process == "primary",
        pdg_code,
        mass: 0.0,
        creation: start,
        direction: [delta[0] / norm, delta[1] / norm, delta[2] / norm],
        start,
        end,
        creation_energy: energy,
        creation_momentum: energy,
        deposited_energy,
        npx: npx as u32,
        creation_process: process.to_string(),
        category,
    })
}

fn random_walk(
    rng: &mut StdRng,
    args: &Args,
    num_fields: usize,
    event: usize,
) -> Result<Sample> {
    let dim = args.data_dim;
    let n = if args.empty_every > 0 && event % args.empty_every == args.empty_every - 1 {
        0
    } else {
        rng.gen_range(args.min_voxels..=args.max_voxels.max(args.min_voxels))
    };
    let upper = args.volume as i32;
    let class = rng.gen_range(0..args.num_classes.max(1)) as f32;

    let mut pos: Vec<i32> = (0..dim).map(|_| rng.gen_range(0..upper)).collect();
    let mut voxels = Vec::with_capacity(n * dim);
    let mut feature = Vec::with_capacity(n);
    for _ in 0..n {
        voxels.extend_from_slice(&pos);
        feature.push(rng.gen_range(5.0f32..400.0));
        let axis = rng.gen_range(0..dim);
        let step = if rng.gen_bool(0.5) { 1 } else { -1 };
        pos[axis] = (pos[axis] + step).clamp(0, upper - 1);
    }

    let particles = if args.with_particles && n > 0 {
        let deposited: f32 = feature.iter().sum();
        let first = &voxels[..dim];
        let last = &voxels[(n - 1) * dim..];
        Some(vec![track_particle(rng, first, last, deposited, n)?])
    } else {
        None
    };
    let fields = (0..num_fields)
        .map(|k| if k == 0 { vec![class; n] } else { vec![1.0; n] })
        .collect();
    Ok(Sample {
        identity: IdentityKey::new(args.run, 0, event as u32),
        geometry: GeometryDescriptor::unit(vec![args.volume; dim]),
        voxels,
        feature,
        fields,
        particles,
    })
}

fn main() -> Result<()> {
    vxio_observe::logging::init_tracing();
    let args = Args::parse();
    anyhow::ensure!(
        (2..=3).contains(&args.data_dim),
        "data_dim must be 2 or 3, got {}",
        args.data_dim
    );
    anyhow::ensure!(args.volume > 0, "volume must be positive");

    let keys: Vec<String> = args
        .data_keys
        .split(',')
        .map(|k| k.trim().to_string())
        .collect();
    let header = SampleFileHeader {
        schema_version: SAMPLE_FILE_SCHEMA_VERSION,
        dim: args.data_dim,
        keys,
    };
    let num_fields = header.keys.len().saturating_sub(1);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let samples = (0..args.num_samples)
        .map(|event| random_walk(&mut rng, &args, num_fields, event))
        .collect::<Result<Vec<Sample>>>()?;
    let voxels: usize = samples.iter().map(Sample::num_voxels).sum();

    write_sample_file(&args.output, &header, &samples)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(
        path = %args.output.display(),
        samples = samples.len() as u64,
        voxels = voxels as u64,
        "sample file written"
    );
    Ok(())
}
