use criterion::{Criterion, criterion_group, criterion_main};
use gpu_particle_sandbox::config::SimSettings;
use gpu_particle_sandbox::simulation::bucket::{BucketGeometry, bucketize_reference};
use gpu_particle_sandbox::simulation::constants::sim_constants_layout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bench_constants_packing(c: &mut Criterion) {
    let layout = sim_constants_layout().unwrap();
    let settings = SimSettings::default();
    let settings_layer = settings.constants_layer();
    let frame_layer = gpu_particle_sandbox::layout::Values::new()
        .with("gridSize", [128u32, 96])
        .with("deltaTime", 1.0f32 / 480.0)
        .with("mouseActivation", 0.0f32)
        .with("mousePosition", [0.0f32, 0.0])
        .with("mouseVelocity", [0.0f32, 0.0])
        .with("fixedPointMultiplier", settings.fixed_point_multiplier())
        .with("mouseRadius", 12.5f32)
        .with("shapeCount", 4u32)
        .with("simFrame", 0u32)
        .with("bukkitCount", 352u32)
        .with("bukkitCountX", 22u32)
        .with("bukkitCountY", 16u32)
        .with("iteration", 0u32)
        .with("maxParticleCount", 1_000_000u32);

    c.bench_function("pack_sim_constants", |b| {
        b.iter(|| layout.pack(&[&settings_layer, &frame_layer]).unwrap())
    });
}

fn bench_bucket_reference(c: &mut Criterion) {
    let grid = [128, 96];
    let geometry = BucketGeometry::for_grid(grid);
    let mut rng = StdRng::seed_from_u64(7);
    let positions: Vec<Option<[f32; 2]>> = (0..100_000)
        .map(|_| {
            rng.gen_bool(0.9).then(|| {
                [
                    rng.gen_range(0.0..grid[0] as f32),
                    rng.gen_range(0.0..grid[1] as f32),
                ]
            })
        })
        .collect();

    c.bench_function("bucketize_reference_100k", |b| {
        b.iter(|| bucketize_reference(geometry, &positions))
    });
}

criterion_group!(benches, bench_constants_packing, bench_bucket_reference);
criterion_main!(benches);
