//! Geohash encoding, neighbor derivation, and great-circle distance.
//!
//! Hashes are plain base-32 strings. Neighbor derivation works on the
//! string alone; no cell geometry is needed to step across a boundary.

use serde::{Deserialize, Serialize};

use crate::errors::RouteError;

/// Mean Earth radius used by the haversine formula (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default geohash precision. A precision-6 cell is ~0.6 km × 1.2 km at the
/// equator, so the 3×3 neighborhood covers a 500 m radius up to about ±65°
/// latitude. See [`neighborhood_covers`].
pub const DEFAULT_PRECISION: usize = 6;

/// Longest geohash the index accepts.
pub const MAX_PRECISION: usize = 12;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// A WGS84 coordinate in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Result<Self, RouteError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(RouteError::validation(format!("lat {lat} outside [-90, 90]")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(RouteError::validation(format!("lon {lon} outside [-180, 180]")));
        }
        Ok(Self { lat, lon })
    }

    /// Haversine distance to `other` in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        haversine_m(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Great-circle distance in meters on a spherical Earth.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Encode a coordinate as a geohash of `precision` characters.
///
/// Bits alternate longitude/latitude starting with longitude; every five
/// bits emit one base-32 character.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bit = 0;
    let mut idx = 0usize;

    while hash.len() < precision {
        if even_bit {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                idx = idx * 2 + 1;
                lon_range.0 = mid;
            } else {
                idx *= 2;
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                idx = idx * 2 + 1;
                lat_range.0 = mid;
            } else {
                idx *= 2;
                lat_range.1 = mid;
            }
        }
        even_bit = !even_bit;

        bit += 1;
        if bit == 5 {
            hash.push(BASE32[idx] as char);
            bit = 0;
            idx = 0;
        }
    }
    hash
}

/// Bounding box of a geohash cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bounds {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lon: (self.min_lon + self.max_lon) / 2.0,
        }
    }
}

/// Decode a geohash to its cell bounds. `None` on an empty hash or a
/// character outside the alphabet.
pub fn decode(hash: &str) -> Option<Bounds> {
    if hash.is_empty() {
        return None;
    }
    let mut lat = (-90.0_f64, 90.0_f64);
    let mut lon = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    for ch in hash.bytes() {
        let idx = BASE32.iter().position(|&c| c == ch)?;
        for n in (0..5).rev() {
            let bit_set = (idx >> n) & 1 == 1;
            let range = if even_bit { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if bit_set {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
    }

    Some(Bounds {
        min_lat: lat.0,
        max_lat: lat.1,
        min_lon: lon.0,
        max_lon: lon.1,
    })
}

/// Cardinal direction for [`neighbor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Lookup tables indexed by `[hash.len() % 2]` (even, odd).
    fn neighbor_table(self) -> [&'static [u8; 32]; 2] {
        match self {
            Self::North => [b"p0r21436x8zb9dcf5h7kjnmqesgutwvy", b"bc01fg45238967deuvhjyznpkmstqrwx"],
            Self::South => [b"14365h7k9dcfesgujnmqp0r2twvyx8zb", b"238967debc01fg45kmstqrwxuvhjyznp"],
            Self::East => [b"bc01fg45238967deuvhjyznpkmstqrwx", b"p0r21436x8zb9dcf5h7kjnmqesgutwvy"],
            Self::West => [b"238967debc01fg45kmstqrwxuvhjyznp", b"14365h7k9dcfesgujnmqp0r2twvyx8zb"],
        }
    }

    fn border_table(self) -> [&'static [u8]; 2] {
        match self {
            Self::North => [b"prxz", b"bcfguvyz"],
            Self::South => [b"028b", b"0145hjnp"],
            Self::East => [b"bcfguvyz", b"prxz"],
            Self::West => [b"0145hjnp", b"028b"],
        }
    }
}

/// Adjacent cell in `dir`. Crossing a parent-cell edge recurses into the
/// parent; an empty parent is the base case (the grid wraps at the poles
/// and antimeridian). Returns `None` for an empty or malformed hash.
pub fn neighbor(hash: &str, dir: Direction) -> Option<String> {
    let (&last, parent) = hash.as_bytes().split_last()?;
    let parity = hash.len() % 2;

    let parent = std::str::from_utf8(parent).ok()?;
    let mut base = if !parent.is_empty() && dir.border_table()[parity].contains(&last) {
        neighbor(parent, dir)?
    } else {
        parent.to_owned()
    };

    let pos = dir.neighbor_table()[parity].iter().position(|&c| c == last)?;
    base.push(BASE32[pos] as char);
    Some(base)
}

/// The 3×3 neighborhood of `hash`: the cell itself, the four cardinal
/// neighbors, and the four diagonals (composed from cardinals).
pub fn neighbors(hash: &str) -> Option<[String; 9]> {
    let n = neighbor(hash, Direction::North)?;
    let s = neighbor(hash, Direction::South)?;
    let e = neighbor(hash, Direction::East)?;
    let w = neighbor(hash, Direction::West)?;
    let ne = neighbor(&n, Direction::East)?;
    let nw = neighbor(&n, Direction::West)?;
    let se = neighbor(&s, Direction::East)?;
    let sw = neighbor(&s, Direction::West)?;
    Some([hash.to_owned(), n, s, e, w, ne, nw, se, sw])
}

/// Cell size in degrees at `precision` as `(height, width)`.
pub fn cell_size_deg(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lon_bits))
}

/// Whether the 3×3 neighborhood around any point at latitude `lat` reaches
/// every point within `radius_m`.
///
/// The ring around the home cell is one cell deep, so the farthest latitude
/// and longitude offsets of the radius circle must each fit inside one cell.
pub fn neighborhood_covers(precision: usize, lat: f64, radius_m: f64) -> bool {
    let (height, width) = cell_size_deg(precision);
    let angle = radius_m / EARTH_RADIUS_M;
    if angle.to_degrees() > height {
        return false;
    }
    let cos_lat = lat.to_radians().cos();
    if cos_lat <= angle.sin() {
        return false;
    }
    (angle.sin() / cos_lat).asin().to_degrees() <= width
}

/// Finest precision whose neighborhood covers `radius_m` at `lat`.
pub fn max_precision_for_radius(lat: f64, radius_m: f64) -> Option<usize> {
    (1..=MAX_PRECISION)
        .rev()
        .find(|&p| neighborhood_covers(p, lat, radius_m))
}
