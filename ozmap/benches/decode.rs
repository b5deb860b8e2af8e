use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tempfile::TempDir;

use ozmap::decoder::{PortableDecoder, StreamingDecoder};
use ozmap::{parse_map, RasterContainer, SessionOptions, SpatialIndex, TileDecoder};

const TILE: u32 = 64;
const SIZE: u32 = 1024;

fn compress(indices: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(indices).unwrap();
    let mut stream = encoder.finish().unwrap();
    stream[1] = 0xDA;
    stream
}

/// Write a plain single-level OZF2 image with a gradient in every tile.
fn create_image(path: &Path) {
    let tiles = SIZE / TILE;
    let mut buf = vec![0u8; 256];
    buf[0..2].copy_from_slice(&0x7778u16.to_le_bytes());
    buf[18..22].copy_from_slice(&(SIZE as i32).to_le_bytes());
    buf[22..26].copy_from_slice(&(SIZE as i32).to_le_bytes());
    buf[26..28].copy_from_slice(&1u16.to_le_bytes());
    buf[28..30].copy_from_slice(&8u16.to_le_bytes());

    let indices: Vec<u8> = (0..TILE * TILE).map(|i| (i % 251) as u8).collect();
    let tile = compress(&indices);
    let mut offsets = Vec::new();
    for _ in 0..tiles * tiles {
        offsets.push(buf.len() as u32);
        buf.extend_from_slice(&tile);
    }
    offsets.push(buf.len() as u32);

    let level_offset = buf.len() as u32;
    buf.extend_from_slice(&(SIZE as i32).to_le_bytes());
    buf.extend_from_slice(&(SIZE as i32).to_le_bytes());
    buf.extend_from_slice(&(tiles as u16).to_le_bytes());
    buf.extend_from_slice(&(tiles as u16).to_le_bytes());
    let palette: Vec<u8> = (0..256u32).flat_map(|i| [i as u8, (255 - i) as u8, 128, 0]).collect();
    buf.extend_from_slice(&palette);
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }

    let table_offset = buf.len() as u32;
    buf.extend_from_slice(&level_offset.to_le_bytes());
    buf.extend_from_slice(&table_offset.to_le_bytes());
    std::fs::write(path, buf).unwrap();
}

/// `.map` text for a `SIZE`² lat/lon map over one degree cell.
fn map_text(image: &str, lat0: i32, lon0: i32, mpp: f64) -> String {
    let (lat1, lon1) = (lat0 + 1, lon0 + 1);
    let (ns0, ns1) = (if lat0 < 0 { 'S' } else { 'N' }, if lat1 < 0 { 'S' } else { 'N' });
    let (ew0, ew1) = (if lon0 < 0 { 'W' } else { 'E' }, if lon1 < 0 { 'W' } else { 'E' });
    let point = |n: u32, x: u32, y: u32, lat: i32, ns: char, lon: i32, ew: char| {
        format!(
            "Point{:02},xy,{},{},in, deg,{}, 0.0,{},{}, 0.0,{}, grid,,,,N\n",
            n,
            x,
            y,
            lat.abs(),
            ns,
            lon.abs(),
            ew
        )
    };
    let mut text = String::new();
    text.push_str("OziExplorer Map Data File Version 2.2\n");
    text.push_str(&format!("Bench {} {}\n", lat0, lon0));
    text.push_str(&format!("{}\n", image));
    text.push_str("1 ,Map Code,\nWGS 84,WGS 84,0,0,WGS 84\nReserved 1\nReserved 2\n");
    text.push_str("Map Projection,Latitude/Longitude,PolyCal,No,AutoCalOnly,No,BSBUseWPX,No\n");
    text.push_str(&point(1, 0, 0, lat1, ns1, lon0, ew0));
    text.push_str(&point(2, SIZE, 0, lat1, ns1, lon1, ew1));
    text.push_str(&point(3, 0, SIZE, lat0, ns0, lon0, ew0));
    text.push_str(&point(4, SIZE, SIZE, lat0, ns0, lon1, ew1));
    text.push_str(&format!("MM1B,{}\n", mpp));
    text.push_str(&format!("IWH,Map Image Width/Height,{},{}\n", SIZE, SIZE));
    text
}

fn bench_tile_decode(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bench.ozf2");
    create_image(&path);
    let container = RasterContainer::open(&path).unwrap();

    let portable = PortableDecoder::new();
    c.bench_function("tile_decode_portable", |b| {
        b.iter(|| black_box(portable.decode(&container, 0, black_box(3), black_box(5))));
    });

    let streaming = StreamingDecoder::new();
    c.bench_function("tile_decode_streaming", |b| {
        b.iter(|| black_box(streaming.decode(&container, 0, black_box(3), black_box(5))));
    });
}

fn bench_cached_fetch(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    create_image(&tmp.path().join("bench.ozf2"));
    let map_path = tmp.path().join("bench.map");
    std::fs::write(&map_path, map_text("bench.ozf2", 10, 20, 10.0)).unwrap();

    let map = Arc::new(ozmap::load_map(&map_path));
    let session = map.activate(800 * 480, &SessionOptions::default()).unwrap();

    // Warm the cache
    let _ = session.tile(3, 5).unwrap();

    c.bench_function("tile_fetch_cached", |b| {
        b.iter(|| black_box(session.tile(black_box(3), black_box(5)).unwrap()));
    });

    c.bench_function("render_800x480", |b| {
        b.iter(|| black_box(session.render(black_box(10.5), black_box(20.5), 800, 480).unwrap()));
    });
}

fn bench_point_query(c: &mut Criterion) {
    // A 20×20 degree block of maps, each cell covered twice
    let mut index = SpatialIndex::new();
    for lat in 30..50 {
        for lon in -10..10 {
            for (i, mpp) in [5.0, 25.0].into_iter().enumerate() {
                let path = format!("/maps/{}_{}_{}.map", lat, lon, i);
                let map = parse_map(&path, &map_text("bench.ozf2", lat, lon, mpp)).unwrap();
                index.insert(Arc::new(map)).unwrap();
            }
        }
    }

    c.bench_function("point_query_800_maps", |b| {
        b.iter(|| black_box(index.query_point(black_box(40.5), black_box(0.5))));
    });
}

criterion_group!(benches, bench_tile_decode, bench_cached_fetch, bench_point_query);
criterion_main!(benches);
