use geo::{Coord, Distance, Haversine, Intersects, LineString, Point, Polygon, Rect};

/// Rough degree approximation used for all buffer calculations: 1° ≈ 111 km.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Great-circle distance between two (lat, lon) points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    // geo points are (x, y) = (lon, lat)
    let a = Point::new(from.1, from.0);
    let b = Point::new(to.1, to.0);
    Haversine::distance(a, b) / 1000.0
}

/// Total length of an ordered (lat, lon) sequence in kilometers.
pub fn route_length_km(coords: &[(f64, f64)]) -> f64 {
    coords.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
}

/// Axis-aligned bounding box in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounding box of the route extrema, expanded by `buffer_km / 111` degrees
    /// on all sides.
    pub fn around_route(coords: &[(f64, f64)], buffer_km: f64) -> Self {
        debug_assert!(!coords.is_empty());
        let mut min_lat = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for &(lat, lon) in coords {
            min_lat = min_lat.min(lat);
            max_lat = max_lat.max(lat);
            min_lon = min_lon.min(lon);
            max_lon = max_lon.max(lon);
        }
        let buffer_deg = buffer_km / KM_PER_DEGREE;
        BoundingBox {
            min_lon: min_lon - buffer_deg,
            min_lat: min_lat - buffer_deg,
            max_lon: max_lon + buffer_deg,
            max_lat: max_lat + buffer_deg,
        }
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }
}

/// (lat, lon) sequence as a geo line string ((x, y) = (lon, lat)).
pub fn line_of(coords: &[(f64, f64)]) -> LineString<f64> {
    coords
        .iter()
        .map(|&(lat, lon)| Coord { x: lon, y: lat })
        .collect()
}

/// Line-polygon intersection in plain lat/lon space. Good enough for corridor
/// filtering at buffer sizes of tens to hundreds of km, no projection needed.
pub fn intersects_buffer(coords: &[(f64, f64)], buffer: &Polygon<f64>) -> bool {
    line_of(coords).intersects(buffer)
}
