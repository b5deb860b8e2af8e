//! OziExplorer `.map` calibration file parsing.
//!
//! A `.map` file is a short text file: seven positional header lines followed
//! by comma-separated records. Records are read with the `csv` crate; unknown
//! records are ignored.

use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use tracing::{debug, warn};

use crate::datum::Datum;
use crate::error::{MapError, Result};
use crate::map::{MapDefinition, MapPoint};
use crate::projection::{utm_zone_for, Projection, ProjectionKind, ProjectionSetup};

/// Every `.map` file starts with this.
pub const HEADER_PREFIX: &str = "OziExplorer Map Data File";

/// Number of positional lines before the records.
const HEADER_LINES: usize = 7;

/// Number of fields of a `PointNN` record.
const POINT_FIELDS: usize = 17;

/// Load a `.map` file.
///
/// Never fails: problems are recorded in [`MapDefinition::load_error`] so that
/// a library scan can keep going and report the map as bad.
///
/// # Example
///
/// ```ignore
/// let map = ozmap::load_map("/maps/alps/alps.map");
/// if let Some(err) = &map.load_error {
///     eprintln!("{}: {}", map.path.display(), err);
/// }
/// ```
pub fn load_map<P: AsRef<Path>>(path: P) -> MapDefinition {
    let path = path.as_ref();
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut map = MapDefinition::new(&canonical);

    let result = fs::read(path)
        .map_err(MapError::from)
        .and_then(|bytes| parse_into(&mut map, &String::from_utf8_lossy(&bytes)));

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to load map");
        map.load_error = Some(e.to_string());
    }
    map
}

/// Parse the text of a `.map` file.
///
/// # Errors
///
/// Returns [`MapError::MapFile`] for malformed content, [`MapError::Projection`]
/// for unsupported projections or datums and [`MapError::Calibration`] if the
/// calibration points cannot be fitted.
pub fn parse_map<P: AsRef<Path>>(path: P, text: &str) -> Result<MapDefinition> {
    let mut map = MapDefinition::new(path);
    parse_into(&mut map, text)?;
    Ok(map)
}

/// A calibration point as written: pixel plus geodetic and/or grid coordinates.
#[derive(Debug, Clone, Copy, Default)]
struct RawPoint {
    x: f64,
    y: f64,
    lat: f64,
    lon: f64,
    zone: u8,
    easting: f64,
    northing: f64,
    south: bool,
}

fn parse_into(map: &mut MapDefinition, text: &str) -> Result<()> {
    let mut header = [""; HEADER_LINES];
    let mut rest = text;
    for slot in header.iter_mut() {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        *slot = line.trim_end_matches('\r');
        rest = tail;
    }

    if !header[0].starts_with(HEADER_PREFIX) {
        return Err(bad(map, 1, "bad map header"));
    }
    map.title = header[1].trim().to_string();
    map.image_path = header[2].trim().to_string();
    map.datum = first_field(header[4]).to_string();

    if first_field(header[5]) == "MSF" {
        let msf: f64 = header[5]
            .split(',')
            .nth(1)
            .and_then(|f| f.trim().parse().ok())
            .filter(|v: &f64| *v > 0.0)
            .ok_or_else(|| bad(map, 6, "bad MSF value"))?;
        map.scale_factor = 1.0 / msf;
    }

    let mut points = Vec::new();
    let mut projection = None;
    let mut setup = ProjectionSetup::default();

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(rest.as_bytes());

    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line() as usize);
            bad(map, HEADER_LINES + line, &e.to_string())
        })?;
        let line = HEADER_LINES + record.position().map_or(0, |p| p.line() as usize);
        let fields: Vec<&str> = record.iter().collect();

        match fields.first().copied().unwrap_or_default() {
            name if name.starts_with("Point") && fields.len() == POINT_FIELDS => {
                if let Some(point) = parse_point(&fields, map.scale_factor) {
                    points.push(point);
                }
            }
            "IWH" => {
                map.width = scaled(field(&fields, 2), map.scale_factor)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| bad(map, line, "bad image width"))?;
                map.height = scaled(field(&fields, 3), map.scale_factor)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| bad(map, line, "bad image height"))?;
            }
            "MMPNUM" => {
                let count: usize = field(&fields, 1)
                    .parse()
                    .map_err(|_| bad(map, line, "bad corner count"))?;
                map.corner_markers = vec![MapPoint::default(); count];
            }
            "MMPXY" => {
                let i = corner_index(map, &fields, line)?;
                let x = scaled(field(&fields, 2), map.scale_factor);
                let y = scaled(field(&fields, 3), map.scale_factor);
                let (Some(x), Some(y)) = (x, y) else {
                    return Err(bad(map, line, "bad XY corner marker"));
                };
                map.corner_markers[i].x = x as f64;
                map.corner_markers[i].y = y as f64;
            }
            "MMPLL" => {
                let i = corner_index(map, &fields, line)?;
                let lon = field(&fields, 2).parse::<f64>();
                let lat = field(&fields, 3).parse::<f64>();
                let (Ok(lon), Ok(lat)) = (lon, lat) else {
                    return Err(bad(map, line, "bad LL corner marker"));
                };
                map.corner_markers[i].lat = lat;
                map.corner_markers[i].lon = lon;
            }
            "MM1B" => {
                map.mpp = field(&fields, 1)
                    .parse()
                    .map_err(|_| bad(map, line, "bad metres per pixel"))?;
            }
            "Map Projection" => {
                projection = Some(ProjectionKind::from_ozi_name(field(&fields, 1))?);
            }
            "Projection Setup" => {
                let value = |i: usize| field(&fields, i).parse::<f64>().ok();
                setup = ProjectionSetup {
                    origin_latitude: value(1),
                    central_meridian: value(2),
                    scale: value(3),
                    false_easting: value(4),
                    false_northing: value(5),
                    standard_parallel_1: value(6),
                    standard_parallel_2: value(7),
                };
            }
            _ => {}
        }
    }

    let datum = Datum::find(&map.datum)?;
    map.ellipsoid = datum.ellipsoid;
    let mut projection = projection.ok_or_else(|| bad(map, 0, "missing Map Projection record"))?;
    projection.apply_setup(&setup);
    projection.validate()?;
    map.projection = projection;

    fix_calibration(map, &points);
    shift_to_wgs84(map, datum);
    map.initialize()?;
    fix_corner_markers(map)?;

    debug!(
        title = %map.title,
        projection = %map.projection.name(),
        ellipsoid = map.ellipsoid.name(),
        points = map.calibration_points.len(),
        corners = map.corner_markers.len(),
        "Loaded map"
    );
    Ok(())
}

fn bad(map: &MapDefinition, line: usize, reason: &str) -> MapError {
    MapError::MapFile {
        path: map.path.clone(),
        line,
        reason: reason.to_string(),
    }
}

fn first_field(line: &str) -> &str {
    line.split(',').next().unwrap_or_default().trim()
}

fn field<'a>(fields: &[&'a str], i: usize) -> &'a str {
    fields.get(i).copied().unwrap_or_default()
}

/// Integer pixel value times the scale factor, truncated.
fn scaled(value: &str, scale_factor: f64) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .map(|v| (v as f64 * scale_factor) as i64)
}

fn corner_index(map: &MapDefinition, fields: &[&str], line: usize) -> Result<usize> {
    field(fields, 1)
        .parse::<usize>()
        .ok()
        .and_then(|i| i.checked_sub(1))
        .filter(|&i| i < map.corner_markers.len())
        .ok_or_else(|| bad(map, line, "corner marker index out of range"))
}

/// Parse a `PointNN` record. `None` for unused (`ex`) or pixel-less points.
fn parse_point(fields: &[&str], scale_factor: f64) -> Option<RawPoint> {
    if fields[4] == "ex" {
        return None;
    }
    let mut point = RawPoint {
        x: scaled(fields[2], scale_factor)? as f64,
        y: scaled(fields[3], scale_factor)? as f64,
        ..RawPoint::default()
    };

    if let Some(lat) = degrees(fields[6], fields[7]) {
        point.lat = if fields[8] == "S" { -lat } else { lat };
    }
    if let Some(lon) = degrees(fields[9], fields[10]) {
        point.lon = if fields[11] == "W" { -lon } else { lon };
    }
    point.zone = fields[13].parse().unwrap_or(0);
    point.easting = fields[14].parse().unwrap_or(0.0);
    point.northing = fields[15].parse().unwrap_or(0.0);
    point.south = fields[16] == "S";
    Some(point)
}

fn degrees(deg: &str, min: &str) -> Option<f64> {
    let deg: i32 = deg.parse().ok()?;
    let min: f64 = min.parse().ok()?;
    Some(deg as f64 + min / 60.0)
}

/// Turn raw points into calibration points.
///
/// UTM maps take their zone and hemisphere from the points. Points given as
/// grid coordinates are converted to lat/lon. Two points are completed to the
/// four corners of the rectangle they span.
fn fix_calibration(map: &mut MapDefinition, raw: &[RawPoint]) {
    let mut points = Vec::with_capacity(raw.len().max(4));

    for p in raw {
        if let ProjectionKind::Utm { zone, south } = &mut map.projection {
            *zone = if p.zone != 0 { p.zone } else { utm_zone_for(p.lon) };
            *south = p.south;
        }

        let (lat, lon) = if p.northing != 0.0 && p.easting != 0.0 {
            map.projector().inverse(p.northing, p.easting)
        } else {
            (p.lat, p.lon)
        };
        points.push(MapPoint {
            x: p.x,
            y: p.y,
            lat,
            lon,
        });
    }

    if let [p1, p2] = points[..] {
        let projector = map.projector();
        let (n1, e1) = projector.forward(p1.lat, p1.lon);
        let (n2, e2) = projector.forward(p2.lat, p2.lon);

        let (lat3, lon3) = projector.inverse(n1, e2);
        let (lat4, lon4) = projector.inverse(n2, e1);
        points.push(MapPoint {
            x: p2.x,
            y: p1.y,
            lat: lat3,
            lon: lon3,
        });
        points.push(MapPoint {
            x: p1.x,
            y: p2.y,
            lat: lat4,
            lon: lon4,
        });
    }

    map.calibration_points = points;
}

/// Move calibration points and corner markers from the map datum to WGS 84.
fn shift_to_wgs84(map: &mut MapDefinition, datum: &Datum) {
    if datum.is_geocentric() {
        return;
    }
    debug!(datum = datum.name, shift = ?datum.shift, "Shifting map datum to WGS 84");

    for p in &mut map.calibration_points {
        (p.lat, p.lon) = datum.to_wgs84(p.lat, p.lon);
    }
    for m in &mut map.corner_markers {
        if (-90.0..=90.0).contains(&m.lat) && (-180.0..=180.0).contains(&m.lon) {
            (m.lat, m.lon) = datum.to_wgs84(m.lat, m.lon);
        }
    }
}

/// Replace missing or invalid corner markers with the image rectangle.
fn fix_corner_markers(map: &mut MapDefinition) -> Result<()> {
    let invalid = map
        .corner_markers
        .iter()
        .any(|m| !(-90.0..=90.0).contains(&m.lat) || !(-180.0..=180.0).contains(&m.lon));
    if !invalid && !map.corner_markers.is_empty() {
        return Ok(());
    }

    let right = map.width.saturating_sub(1) as f64;
    let bottom = map.height.saturating_sub(1) as f64;
    let mut corners = Vec::with_capacity(4);
    for (x, y) in [(0.0, 0.0), (0.0, bottom), (right, bottom), (right, 0.0)] {
        let (lat, lon) = map
            .geo_from_pixel(x, y)
            .ok_or_else(|| MapError::calibration("map is not calibrated"))?;
        corners.push(MapPoint { x, y, lat, lon });
    }
    map.corner_markers = corners;
    Ok(())
}
