use serde::Deserialize;
use serde_json::Value;

/// Just enough GeoJSON for precinct boundaries and address layers: a
/// feature collection of Point / Polygon / MultiPolygon features with
/// free-form properties. Positions are `[lon, lat, ...]`; anything past
/// the first two coordinates is ignored.
#[derive(Debug, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub properties: Value,
    pub geometry: Geometry,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Vec<f64> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub lat: f64,
    pub lon: f64,
}

impl Feature {
    /// Reads a property as a trimmed, uppercased string; numbers are
    /// stringified, anything else comes back empty.
    pub fn property_string(&self, key: &str) -> String {
        match self.properties.get(key) {
            Some(Value::String(s)) => s.trim().to_uppercase(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// Area-weighted centroid of the exterior ring, shoelace formula. For a
/// MultiPolygon the largest-area component wins. Degenerate rings (near
/// zero area) fall back to averaging the vertices.
pub fn centroid(geometry: &Geometry) -> Option<Centroid> {
    match geometry {
        Geometry::Point { coordinates } => {
            if coordinates.len() < 2 {
                return None;
            }
            Some(Centroid { lon: coordinates[0], lat: coordinates[1] })
        }
        Geometry::Polygon { coordinates } => ring_centroid(coordinates.first()?),
        Geometry::MultiPolygon { coordinates } => {
            let mut best: Option<(f64, Centroid)> = None;
            for polygon in coordinates {
                let ring = match polygon.first() {
                    Some(r) => r,
                    None => continue,
                };
                let area = ring_area(ring).abs();
                if let Some(c) = ring_centroid(ring) {
                    if best.as_ref().map_or(true, |(a, _)| area > *a) {
                        best = Some((area, c));
                    }
                }
            }
            best.map(|(_, c)| c)
        }
    }
}

/// Ray-casting containment test against the exterior ring(s). Points on
/// an edge may land either way; fine for clipping address points to a city
/// boundary.
pub fn contains(geometry: &Geometry, lat: f64, lon: f64) -> bool {
    match geometry {
        Geometry::Point { .. } => false,
        Geometry::Polygon { coordinates } => coordinates
            .first()
            .map_or(false, |ring| ring_contains(ring, lat, lon)),
        Geometry::MultiPolygon { coordinates } => coordinates
            .iter()
            .filter_map(|polygon| polygon.first())
            .any(|ring| ring_contains(ring, lat, lon)),
    }
}

fn ring_contains(ring: &[Vec<f64>], lat: f64, lon: f64) -> bool {
    let mut inside = false;
    for pair in ring.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.len() < 2 || b.len() < 2 {
            continue;
        }
        let (x1, y1) = (a[0], a[1]);
        let (x2, y2) = (b[0], b[1]);
        if (y1 > lat) != (y2 > lat) {
            let x_cross = x1 + (lat - y1) / (y2 - y1) * (x2 - x1);
            if lon < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn ring_area(ring: &[Vec<f64>]) -> f64 {
    let mut sum = 0.0;
    for pair in ring.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.len() < 2 || b.len() < 2 {
            continue;
        }
        sum += a[0] * b[1] - b[0] * a[1];
    }
    sum / 2.0
}

fn ring_centroid(ring: &[Vec<f64>]) -> Option<Centroid> {
    if ring.is_empty() {
        return None;
    }
    let area = ring_area(ring);
    if area.abs() < 1e-12 {
        // Collapsed ring: average the vertices instead.
        let valid: Vec<&Vec<f64>> = ring.iter().filter(|p| p.len() >= 2).collect();
        if valid.is_empty() {
            return None;
        }
        let n = valid.len() as f64;
        return Some(Centroid {
            lon: valid.iter().map(|p| p[0]).sum::<f64>() / n,
            lat: valid.iter().map(|p| p[1]).sum::<f64>() / n,
        });
    }

    let mut cx = 0.0;
    let mut cy = 0.0;
    for pair in ring.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.len() < 2 || b.len() < 2 {
            continue;
        }
        let cross = a[0] * b[1] - b[0] * a[1];
        cx += (a[0] + b[0]) * cross;
        cy += (a[1] + b[1]) * cross;
    }
    Some(Centroid {
        lon: cx / (6.0 * area),
        lat: cy / (6.0 * area),
    })
}
