//! Benchmarks for the clip, merge and tabulate hot paths.
//!
//! Run with: `cargo bench`
//!
//! All inputs are synthetic tiles built in memory, except the pipeline
//! benchmark which writes one GeoTIFF to a temporary directory.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use geo::polygon;
use std::hint::black_box;
use tokio::runtime::Runtime;

use cogsummary::clip::reproject_nearest;
use cogsummary::source::TileLocation;
use cogsummary::{
    clip_tile, merge, summarize, tabulate, Aoi, CrsCode, GeoTransform, RasterTile, SummaryOptions,
};

/// Square lon/lat tile of `size` pixels at 0.001 degrees, with varied classes
fn lonlat_tile(size: usize) -> RasterTile {
    let pixels = (0..size * size).map(|i| ((i / 7) % 11) as i32).collect();
    RasterTile::new(
        pixels,
        size,
        size,
        GeoTransform::from_origin(-100.0, 41.0, 0.001, 0.001),
        CrsCode::WGS84,
        Some(0),
    )
    .unwrap()
}

fn aoi() -> Aoi {
    Aoi::from_polygon(
        polygon![
            (x: -99.95, y: 40.95),
            (x: -99.55, y: 40.9),
            (x: -99.6, y: 40.55),
            (x: -99.9, y: 40.6),
            (x: -99.95, y: 40.95),
        ],
        CrsCode::WGS84,
    )
    .unwrap()
}

/// Benchmark nearest-neighbour reprojection at various tile sizes
fn bench_reproject(c: &mut Criterion) {
    let mut group = c.benchmark_group("reproject_nearest");
    group.sample_size(20);

    for size in [128, 256, 512] {
        let tile = lonlat_tile(size);
        group.bench_with_input(BenchmarkId::new("size", size), &tile, |b, tile| {
            b.iter(|| reproject_nearest(black_box(tile), CrsCode::epsg(5070)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark clipping a tile to a quadrilateral AOI
fn bench_clip(c: &mut Criterion) {
    let tile = lonlat_tile(512);
    let aoi = aoi();

    c.bench_function("clip_tile_512", |b| {
        b.iter(|| clip_tile(black_box(&tile), black_box(&aoi), CrsCode::epsg(5070)).unwrap());
    });
}

/// Benchmark merging overlapping tiles
fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for count in [1, 2, 4, 8] {
        let tiles: Vec<RasterTile> = (0..count)
            .map(|i| {
                let offset = f64::from(i) * 5000.0;
                RasterTile::filled(
                    i + 1,
                    500,
                    500,
                    GeoTransform::from_origin(offset, 2_000_000.0 - offset, 30.0, 30.0),
                    CrsCode::epsg(5070),
                    Some(0),
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("tiles", count), &tiles, |b, tiles| {
            b.iter(|| merge(black_box(tiles)).unwrap());
        });
    }

    group.finish();
}

/// Benchmark histogram tabulation
fn bench_tabulate(c: &mut Criterion) {
    let tile = lonlat_tile(1024);

    c.bench_function("tabulate_1024", |b| {
        b.iter(|| tabulate(black_box(&tile)));
    });
}

/// Benchmark the whole pipeline over one tile on disk
fn bench_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.tif");
    lonlat_tile(1024).write_geotiff(&path).unwrap();

    let aoi = aoi();
    let tiles = vec![TileLocation::Local(path)];
    let options = SummaryOptions::default();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    group.bench_function("summarize_one_tile", |b| {
        b.iter(|| {
            rt.block_on(async { summarize(black_box(&aoi), &tiles, &options).await.unwrap() })
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_reproject,
    bench_clip,
    bench_merge,
    bench_tabulate,
    bench_pipeline,
);

criterion_main!(benches);
