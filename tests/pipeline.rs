//! End-to-end runs over synthetic GeoTIFF tiles.

use std::path::{Path, PathBuf};

use cogsummary::source::{LocalScanOptions, LocalTileCatalog, TileCatalog, TileLocation};
use cogsummary::{
    build_mosaic, summarize, Aoi, CrsCode, GeoTransform, MosaicRun, PipelineError, RasterTile,
    SummaryOptions,
};

/// 1x1 degree square in Nebraska/Kansas, as a GeoJSON FeatureCollection
const NA_SQUARE: &str = r#"{
    "type": "FeatureCollection",
    "features": [{
        "type": "Feature",
        "properties": {"name": "square"},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-100.0, 40.0], [-99.0, 40.0], [-99.0, 41.0], [-100.0, 41.0], [-100.0, 40.0]]]
        }
    }]
}"#;

/// 10 km square in EPSG:5070 on a 100 m grid
const ALBERS_SQUARE: &str = r#"{
    "type": "Feature",
    "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::5070"}},
    "properties": {},
    "geometry": {
        "type": "Polygon",
        "coordinates": [[[-100000.0, 1900000.0], [-90000.0, 1900000.0], [-90000.0, 1910000.0], [-100000.0, 1910000.0], [-100000.0, 1900000.0]]]
    }
}"#;

/// Class 2 in every tenth column, class 1 elsewhere
fn striped(width: usize, height: usize, transform: GeoTransform, crs: CrsCode) -> RasterTile {
    let pixels = (0..width * height)
        .map(|i| if (i % width) % 10 == 0 { 2 } else { 1 })
        .collect();
    RasterTile::new(pixels, width, height, transform, crs, Some(0)).unwrap()
}

fn albers_tile(value: Option<i32>) -> RasterTile {
    let transform = GeoTransform::from_origin(-110000.0, 1920000.0, 100.0, 100.0);
    match value {
        Some(v) => RasterTile::filled(v, 300, 300, transform, CrsCode::epsg(5070), Some(0)),
        None => striped(300, 300, transform, CrsCode::epsg(5070)),
    }
}

/// Columns `start..end` of `tile` as a tile of their own
fn columns(tile: &RasterTile, start: usize, end: usize) -> RasterTile {
    let pixels = (0..tile.height)
        .flat_map(|row| tile.pixels[row * tile.width + start..row * tile.width + end].iter().copied())
        .collect();
    RasterTile::new(
        pixels,
        end - start,
        tile.height,
        tile.transform.window(start, 0),
        tile.crs,
        tile.nodata,
    )
    .unwrap()
}

fn valid_pixels(run: &MosaicRun) -> u64 {
    let histogram = run.summary().histogram;
    histogram.get(1) + histogram.get(2)
}

fn write(dir: &Path, name: &str, tile: &RasterTile) -> TileLocation {
    let path: PathBuf = dir.join(name);
    tile.write_geotiff(&path).unwrap();
    TileLocation::Local(path)
}

#[tokio::test]
async fn test_one_degree_square_in_north_america() {
    let dir = tempfile::tempdir().unwrap();
    let tile = striped(
        200,
        200,
        GeoTransform::from_origin(-100.5, 41.5, 0.01, 0.01),
        CrsCode::WGS84,
    );
    let location = write(dir.path(), "lulc.tif", &tile);
    let aoi = Aoi::from_geojson_str(NA_SQUARE).unwrap();

    let report = summarize(&aoi, &[location], &SummaryOptions::default())
        .await
        .unwrap();
    println!("{}x{} in {}", report.width, report.height, report.target_crs);

    assert_eq!(report.target_crs, CrsCode::epsg(5070));
    assert_eq!(report.tiles_merged, 1);
    assert!(report.histogram.get(1) > 0);
    assert!(report.histogram.get(2) > 0);
    assert!(report.histogram.get(1) > 5 * report.histogram.get(2));
    for (value, _) in report.histogram.iter() {
        assert!([0, 1, 2].contains(&value), "unexpected class {value}");
    }
    assert_eq!(report.histogram.total(), (report.width * report.height) as u64);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"List(1)\": "));
    assert!(json.contains("\"List(2)\": "));
}

#[tokio::test]
async fn test_aligned_tile_exact_counts() {
    let dir = tempfile::tempdir().unwrap();
    let location = write(dir.path(), "albers.tif", &albers_tile(None));
    let aoi = Aoi::from_geojson_str(ALBERS_SQUARE).unwrap();

    let report = summarize(&aoi, &[location], &SummaryOptions::default())
        .await
        .unwrap();

    assert_eq!((report.width, report.height), (100, 100));
    assert_eq!(
        report.to_json().unwrap(),
        "{\n    \"List(1)\": 9000,\n    \"List(2)\": 1000\n}"
    );
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let dir = tempfile::tempdir().unwrap();
    let tile = striped(
        200,
        200,
        GeoTransform::from_origin(-100.5, 41.5, 0.01, 0.01),
        CrsCode::WGS84,
    );
    let location = write(dir.path(), "lulc.tif", &tile);
    let aoi = Aoi::from_geojson_str(NA_SQUARE).unwrap();
    let options = SummaryOptions::default().with_max_concurrent_tiles(2);
    let tiles = vec![location.clone(), location];

    let first = summarize(&aoi, &tiles, &options).await.unwrap();
    let second = summarize(&aoi, &tiles, &options).await.unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[tokio::test]
async fn test_adjacent_tiles_meet_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let whole = striped(
        200,
        200,
        GeoTransform::from_origin(-100.5, 41.5, 0.01, 0.01),
        CrsCode::WGS84,
    );
    let single = write(dir.path(), "whole.tif", &whole);
    // seam at -99.5, through the middle of the AOI
    let west = write(dir.path(), "west.tif", &columns(&whole, 0, 100));
    let east = write(dir.path(), "east.tif", &columns(&whole, 100, 200));
    let aoi = Aoi::from_geojson_str(NA_SQUARE).unwrap();
    let options = SummaryOptions::default();

    let one = build_mosaic(&aoi, &[single], &options).await.unwrap();
    let split = build_mosaic(&aoi, &[west, east], &options).await.unwrap();
    assert_eq!(split.tiles_merged, 2);

    let (one_res, _) = one.mosaic.transform.resolution();
    let (split_res, _) = split.mosaic.transform.resolution();
    assert!((one_res - split_res).abs() / one_res < 1e-6, "{one_res} vs {split_res}");

    let mosaic = &split.mosaic;
    let nodata = mosaic.nodata_or_default();
    for row in 0..mosaic.height {
        let line = &mosaic.pixels[row * mosaic.width..(row + 1) * mosaic.width];
        let first = line.iter().position(|&v| v != nodata);
        let last = line.iter().rposition(|&v| v != nodata);
        if let (Some(first), Some(last)) = (first, last) {
            let holes = line[first..=last].iter().filter(|&&v| v == nodata).count();
            assert_eq!(holes, 0, "row {row} has nodata between valid pixels");
        }
    }

    let (a, b) = (valid_pixels(&one), valid_pixels(&split));
    #[allow(clippy::cast_precision_loss)]
    let difference = a.abs_diff(b) as f64 / a as f64;
    assert!(difference < 0.01, "single tile {a} valid pixels, split {b}");
}

#[tokio::test]
async fn test_merge_order_decides_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "a.tif", &albers_tile(Some(3)));
    let b = write(dir.path(), "b.tif", &albers_tile(Some(4)));
    let aoi = Aoi::from_geojson_str(ALBERS_SQUARE).unwrap();
    let options = SummaryOptions::default();

    let ab = summarize(&aoi, &[a.clone(), b.clone()], &options).await.unwrap();
    assert_eq!(ab.histogram.get(3), 10000);
    assert_eq!(ab.histogram.get(4), 0);

    let ba = summarize(&aoi, &[b, a], &options).await.unwrap();
    assert_eq!(ba.histogram.get(4), 10000);
    assert_eq!(ba.histogram.get(3), 0);
}

#[tokio::test]
async fn test_spill_dir_is_cleaned_up() {
    let tiles_dir = tempfile::tempdir().unwrap();
    let spill_dir = tempfile::tempdir().unwrap();
    let location = write(tiles_dir.path(), "albers.tif", &albers_tile(None));
    let aoi = Aoi::from_geojson_str(ALBERS_SQUARE).unwrap();

    let in_memory = summarize(&aoi, &[location.clone()], &SummaryOptions::default())
        .await
        .unwrap();
    let spilled = summarize(
        &aoi,
        &[location],
        &SummaryOptions::default().with_spill_dir(spill_dir.path()),
    )
    .await
    .unwrap();

    assert_eq!(in_memory, spilled);
    assert_eq!(std::fs::read_dir(spill_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_spill_dir_is_cleaned_up_on_failure() {
    let tiles_dir = tempfile::tempdir().unwrap();
    let spill_dir = tempfile::tempdir().unwrap();
    let good = write(tiles_dir.path(), "albers.tif", &albers_tile(None));
    let missing = TileLocation::Local(tiles_dir.path().join("missing.tif"));
    let aoi = Aoi::from_geojson_str(ALBERS_SQUARE).unwrap();

    let result = summarize(
        &aoi,
        &[good, missing],
        &SummaryOptions::default().with_spill_dir(spill_dir.path()),
    )
    .await;

    assert!(matches!(result, Err(PipelineError::Clip { .. })));
    assert_eq!(std::fs::read_dir(spill_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_no_tiles_and_no_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let aoi = Aoi::from_geojson_str(NA_SQUARE).unwrap();

    let empty = summarize(&aoi, &[], &SummaryOptions::default()).await;
    assert!(matches!(empty, Err(PipelineError::NoTiles)));

    let far = RasterTile::filled(
        5,
        50,
        50,
        GeoTransform::from_origin(10.0, 50.0, 0.01, 0.01),
        CrsCode::WGS84,
        Some(0),
    );
    let location = write(dir.path(), "far.tif", &far);
    let disjoint = summarize(&aoi, &[location], &SummaryOptions::default()).await;
    assert!(matches!(disjoint, Err(PipelineError::NoOverlap)));
}

#[tokio::test]
async fn test_local_catalog_feeds_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "albers.tif", &albers_tile(Some(7)));
    let far = RasterTile::filled(
        5,
        50,
        50,
        GeoTransform::from_origin(10.0, 50.0, 0.01, 0.01),
        CrsCode::WGS84,
        Some(0),
    );
    write(dir.path(), "far.tif", &far);

    let aoi = Aoi::from_geojson_str(ALBERS_SQUARE).unwrap();
    let catalog = LocalTileCatalog::new(dir.path(), LocalScanOptions::default());
    let tiles = catalog.find_tiles(&aoi).unwrap();
    assert_eq!(tiles, vec![TileLocation::Local(dir.path().join("albers.tif"))]);

    let report = summarize(&aoi, &tiles, &SummaryOptions::default()).await.unwrap();
    assert_eq!(report.to_json().unwrap(), "{\n    \"List(7)\": 10000\n}");
}
