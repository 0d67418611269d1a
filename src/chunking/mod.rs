//! Spherical-box chunk/sub-chunk ID algebra.
//!
//! Ported from `admin/dupr/src/Chunker.{h,cc}`. `Geometry.h`/`Hash.h` were
//! not part of the retrieved source tree, so `hash()` and `max_alpha()` below
//! are reconstructed from the documented call-site contracts in `Chunker.cc`
//! rather than transliterated line-for-line.

use crate::common::{ChunkId, SubChunkId};
use crate::error::{CoreError, Result};

const RAD_PER_DEG: f64 = std::f64::consts::PI / 180.0;
const DEG_PER_RAD: f64 = 180.0 / std::f64::consts::PI;

/// A bounding box in spherical (longitude, latitude) coordinates, degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl SphericalBox {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self { lon_min, lon_max, lat_min, lat_max }
    }

    pub fn center(&self) -> (f64, f64) {
        let lon = if self.lon_max < self.lon_min {
            let span = (self.lon_max + 360.0 - self.lon_min) / 2.0;
            clamp_lon(self.lon_min + span)
        } else {
            (self.lon_min + self.lon_max) / 2.0
        };
        (lon, (self.lat_min + self.lat_max) / 2.0)
    }

    pub fn intersects(&self, other: &SphericalBox) -> bool {
        let lat_ok = self.lat_min <= other.lat_max && other.lat_min <= self.lat_max;
        if !lat_ok {
            return false;
        }
        lon_ranges_intersect(self.lon_min, self.lon_max, other.lon_min, other.lon_max)
    }
}

fn lon_ranges_intersect(a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> bool {
    // Whole-sky wrap: a chunk spanning all 360 degrees (lonMin==0, lonMax==360
    // after clamping) always intersects.
    let a_wraps = a_max < a_min;
    let b_wraps = b_max < b_min;
    match (a_wraps, b_wraps) {
        (false, false) => a_min <= b_max && b_min <= a_max,
        (true, false) => (a_min <= b_max) || (b_min <= a_max),
        (false, true) => (b_min <= a_max) || (a_min <= b_max),
        (true, true) => true,
    }
}

fn clamp_lon(lon: f64) -> f64 {
    let mut l = lon % 360.0;
    if l < 0.0 {
        l += 360.0;
    }
    if l >= 360.0 {
        l = 0.0;
    }
    l
}

fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-90.0, 90.0)
}

/// Number of equal-longitude-width segments a latitude stripe is divided
/// into such that any two points at least one segment apart in longitude
/// are separated by an angular distance of at least `width` degrees.
pub fn segments(lat_min: f64, lat_max: f64, width: f64) -> i32 {
    let lat = lat_min.abs().max(lat_max.abs());
    if lat > 90.0 - 1.0 / 3600.0 {
        return 1;
    }
    let mut width = width;
    if width >= 180.0 {
        return 1;
    } else if width < 1.0 / 3600.0 {
        width = 1.0 / 3600.0;
    }
    let lat = lat * RAD_PER_DEG;
    let cw = (width * RAD_PER_DEG).cos();
    let sl = lat.sin();
    let cl = lat.cos();
    let x = cw - sl * sl;
    let u = cl * cl;
    let y = ((u * u) - (x * x)).abs().sqrt();
    (360.0 / (DEG_PER_RAD * y.atan2(x)).abs()).floor() as i32
}

/// Inverse of [`segments`]: the longitude width of one of `num_segments`
/// equal-width segments dividing the stripe `[lat_min, lat_max]`.
pub fn segment_width(lat_min: f64, lat_max: f64, num_segments: i32) -> f64 {
    let lat = lat_min.abs().max(lat_max.abs()) * RAD_PER_DEG;
    let cw = (RAD_PER_DEG * (360.0 / num_segments as f64)).cos();
    let sl = lat.sin();
    let cl = lat.cos();
    (cw * cl * cl + sl * sl).acos() * DEG_PER_RAD
}

/// Maximum longitude half-width of a circle of angular radius `r` (degrees)
/// centered at latitude `center_lat` (degrees, unsigned).
fn max_alpha(r: f64, center_lat: f64) -> f64 {
    if r <= 0.0 {
        return 0.0;
    }
    if center_lat + r > 90.0 || center_lat - r < -90.0 {
        return 180.0;
    }
    let lat = center_lat.abs() * RAD_PER_DEG;
    let r = r * RAD_PER_DEG;
    let y = r.sin();
    let x = ((lat - r).cos() * (lat + r).cos()).abs().sqrt();
    DEG_PER_RAD * (y / x).atan().abs()
}

/// A deterministic, process-stable hash of a chunk ID, used solely for
/// chunk-to-node placement (`hash(chunkId) mod numNodes`).
pub fn hash(chunk_id: u32) -> u32 {
    let mut x = chunk_id as u64;
    x ^= x >> 16;
    x = x.wrapping_mul(0x85ebca6b);
    x ^= x >> 13;
    x = x.wrapping_mul(0xc2b2ae35);
    x ^= x >> 16;
    x as u32
}

/// The chunk/sub-chunk location of a point on the sky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    pub chunk_id: ChunkId,
    pub sub_chunk_id: SubChunkId,
    pub overlap: bool,
}

impl ChunkLocation {
    pub fn hash(&self) -> u32 {
        hash(self.chunk_id)
    }
}

impl PartialOrd for ChunkLocation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChunkLocation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.chunk_id.cmp(&other.chunk_id)
    }
}

/// Locates points on the sky according to the partitioning scheme, and
/// answers bounding-box and chunk-to-node placement queries.
pub struct Chunker {
    overlap: f64,
    sub_stripe_height: f64,
    num_stripes: i32,
    num_sub_stripes_per_stripe: i32,
    max_sub_chunks_per_chunk: i32,
    num_chunks_per_stripe: Vec<i32>,
    num_sub_chunks_per_chunk: Vec<i32>,
    sub_chunk_width: Vec<f64>,
    alpha: Vec<f64>,
}

impl Chunker {
    pub fn new(overlap: f64, num_stripes: i32, num_sub_stripes_per_stripe: i32) -> Result<Self> {
        if num_stripes < 1 || num_sub_stripes_per_stripe < 1 {
            return Err(CoreError::Partition(
                "the number of stripes and sub-stripes per stripe must be positive".into(),
            ));
        }
        if !(0.0..=10.0).contains(&overlap) {
            return Err(CoreError::Partition(
                "the overlap radius must be in range [0, 10] deg".into(),
            ));
        }
        let num_sub_stripes = num_stripes * num_sub_stripes_per_stripe;
        let stripe_height = 180.0 / num_stripes as f64;
        let sub_stripe_height = 180.0 / num_sub_stripes as f64;
        if sub_stripe_height < overlap {
            return Err(CoreError::Partition(
                "the overlap radius is greater than the sub-stripe height".into(),
            ));
        }

        let mut num_chunks_per_stripe = vec![0i32; num_stripes as usize];
        let mut num_sub_chunks_per_chunk = vec![0i32; num_sub_stripes as usize];
        let mut sub_chunk_width = vec![0f64; num_sub_stripes as usize];
        let mut alpha = vec![0f64; num_sub_stripes as usize];
        let mut max_sub_chunks_per_chunk = 0i32;

        for i in 0..num_stripes {
            let nc = segments(
                i as f64 * stripe_height - 90.0,
                (i + 1) as f64 * stripe_height - 90.0,
                stripe_height,
            );
            num_chunks_per_stripe[i as usize] = nc;
            for j in 0..num_sub_stripes_per_stripe {
                let ss = (i * num_sub_stripes_per_stripe + j) as usize;
                let lat_min = ss as f64 * sub_stripe_height - 90.0;
                let lat_max = (ss + 1) as f64 * sub_stripe_height - 90.0;
                let nsc = segments(lat_min, lat_max, sub_stripe_height) / nc;
                max_sub_chunks_per_chunk = max_sub_chunks_per_chunk.max(nsc);
                num_sub_chunks_per_chunk[ss] = nsc;
                let scw = 360.0 / (nsc * nc) as f64;
                sub_chunk_width[ss] = scw;
                let a = max_alpha(overlap, lat_min.abs().max(lat_max.abs()));
                if a > scw {
                    return Err(CoreError::Partition(
                        "the overlap radius is greater than the sub-chunk width".into(),
                    ));
                }
                alpha[ss] = a;
            }
        }

        Ok(Self {
            overlap,
            sub_stripe_height,
            num_stripes,
            num_sub_stripes_per_stripe,
            max_sub_chunks_per_chunk,
            num_chunks_per_stripe,
            num_sub_chunks_per_chunk,
            sub_chunk_width,
            alpha,
        })
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    fn get_stripe(&self, chunk_id: i32) -> i32 {
        chunk_id / (2 * self.num_stripes)
    }

    fn get_chunk(&self, chunk_id: i32, stripe: i32) -> i32 {
        chunk_id - stripe * 2 * self.num_stripes
    }

    fn get_sub_stripe(&self, sub_chunk_id: i32, stripe: i32) -> i32 {
        stripe * self.num_sub_stripes_per_stripe + sub_chunk_id / self.max_sub_chunks_per_chunk
    }

    fn get_sub_chunk(&self, sub_chunk_id: i32, stripe: i32, sub_stripe: i32, chunk: i32) -> i32 {
        sub_chunk_id - (sub_stripe - stripe * self.num_sub_stripes_per_stripe) * self.max_sub_chunks_per_chunk
            + chunk * self.num_sub_chunks_per_chunk[sub_stripe as usize]
    }

    fn get_chunk_id(&self, stripe: i32, chunk: i32) -> i32 {
        stripe * 2 * self.num_stripes + chunk
    }

    fn get_sub_chunk_id(&self, stripe: i32, sub_stripe: i32, chunk: i32, sub_chunk: i32) -> i32 {
        (sub_stripe - stripe * self.num_sub_stripes_per_stripe) * self.max_sub_chunks_per_chunk
            + (sub_chunk - chunk * self.num_sub_chunks_per_chunk[sub_stripe as usize])
    }

    pub fn get_chunk_bounds(&self, chunk_id: ChunkId) -> SphericalBox {
        let chunk_id = chunk_id as i32;
        let stripe = self.get_stripe(chunk_id);
        let chunk = self.get_chunk(chunk_id, stripe);
        let width = 360.0 / self.num_chunks_per_stripe[stripe as usize] as f64;
        let lon_min = chunk as f64 * width;
        let lon_max = clamp_lon((chunk + 1) as f64 * width);
        let lat_min = clamp_lat(
            stripe as f64 * self.num_sub_stripes_per_stripe as f64 * self.sub_stripe_height - 90.0,
        );
        let lat_max = clamp_lat(
            (stripe + 1) as f64 * self.num_sub_stripes_per_stripe as f64 * self.sub_stripe_height - 90.0,
        );
        SphericalBox::new(lon_min, lon_max, lat_min, lat_max)
    }

    pub fn get_sub_chunk_bounds(&self, chunk_id: ChunkId, sub_chunk_id: SubChunkId) -> SphericalBox {
        let chunk_id = chunk_id as i32;
        let sub_chunk_id = sub_chunk_id as i32;
        let stripe = self.get_stripe(chunk_id);
        let chunk = self.get_chunk(chunk_id, stripe);
        let sub_stripe = self.get_sub_stripe(sub_chunk_id, stripe);
        let sub_chunk = self.get_sub_chunk(sub_chunk_id, stripe, sub_stripe, chunk);
        let scw = self.sub_chunk_width[sub_stripe as usize];
        let lon_min = sub_chunk as f64 * scw;
        let lon_max = clamp_lon((sub_chunk + 1) as f64 * scw);
        let lat_min = clamp_lat(sub_stripe as f64 * self.sub_stripe_height - 90.0);
        let lat_max = clamp_lat((sub_stripe + 1) as f64 * self.sub_stripe_height - 90.0);
        SphericalBox::new(lon_min, lon_max, lat_min, lat_max)
    }

    /// Find the unique non-overlap location of `(lon, lat)`.
    pub fn locate(&self, lon: f64, lat: f64) -> ChunkLocation {
        let num_sub_stripes = self.num_sub_stripes_per_stripe * self.num_stripes;
        let mut sub_stripe = ((lat + 90.0) / self.sub_stripe_height).floor() as i32;
        if sub_stripe >= num_sub_stripes {
            sub_stripe = num_sub_stripes - 1;
        }
        let stripe = sub_stripe / self.num_sub_stripes_per_stripe;
        let mut sub_chunk = (lon / self.sub_chunk_width[sub_stripe as usize]).floor() as i32;
        let num_chunks = self.num_chunks_per_stripe[stripe as usize];
        let num_sub_chunks_per_chunk = self.num_sub_chunks_per_chunk[sub_stripe as usize];
        let num_sub_chunks = num_chunks * num_sub_chunks_per_chunk;
        if sub_chunk >= num_sub_chunks {
            sub_chunk = num_sub_chunks - 1;
        }
        let chunk = sub_chunk / num_sub_chunks_per_chunk;
        ChunkLocation {
            chunk_id: self.get_chunk_id(stripe, chunk) as ChunkId,
            sub_chunk_id: self.get_sub_chunk_id(stripe, sub_stripe, chunk, sub_chunk) as SubChunkId,
            overlap: false,
        }
    }

    /// Append the non-overlap location of `(lon, lat)` plus every overlap
    /// location matching `chunk_id` (or all overlap locations if `chunk_id`
    /// is `None`) to `locations`.
    pub fn locate_with_overlap(
        &self,
        lon: f64,
        lat: f64,
        chunk_id: Option<ChunkId>,
        locations: &mut Vec<ChunkLocation>,
    ) {
        let want = |id: i32| chunk_id.is_none() || chunk_id == Some(id as ChunkId);
        let num_sub_stripes = self.num_sub_stripes_per_stripe * self.num_stripes;
        let mut sub_stripe = ((lat + 90.0) / self.sub_stripe_height).floor() as i32;
        if sub_stripe >= num_sub_stripes {
            sub_stripe = num_sub_stripes - 1;
        }
        let stripe = sub_stripe / self.num_sub_stripes_per_stripe;
        let mut sub_chunk = (lon / self.sub_chunk_width[sub_stripe as usize]).floor() as i32;
        let num_chunks = self.num_chunks_per_stripe[stripe as usize];
        let num_sub_chunks_per_chunk = self.num_sub_chunks_per_chunk[sub_stripe as usize];
        let num_sub_chunks = num_chunks * num_sub_chunks_per_chunk;
        if sub_chunk >= num_sub_chunks {
            sub_chunk = num_sub_chunks - 1;
        }
        let chunk = sub_chunk / num_sub_chunks_per_chunk;
        if want(self.get_chunk_id(stripe, chunk)) {
            locations.push(ChunkLocation {
                chunk_id: self.get_chunk_id(stripe, chunk) as ChunkId,
                sub_chunk_id: self.get_sub_chunk_id(stripe, sub_stripe, chunk, sub_chunk) as SubChunkId,
                overlap: false,
            });
        }
        if self.overlap == 0.0 {
            return;
        }

        let scw = self.sub_chunk_width[sub_stripe as usize];
        let lon_min = sub_chunk as f64 * scw;
        let lon_max = clamp_lon((sub_chunk + 1) as f64 * scw);
        let lat_min = clamp_lat(sub_stripe as f64 * self.sub_stripe_height - 90.0);
        let lat_max = clamp_lat((sub_stripe + 1) as f64 * self.sub_stripe_height - 90.0);

        if sub_stripe > 0 && lat < lat_min + self.overlap {
            self.up_down_overlap(lon, chunk_id, sub_stripe - 1, locations);
        }
        if sub_stripe < num_sub_stripes - 1 && lat >= lat_max - self.overlap {
            self.up_down_overlap(lon, chunk_id, sub_stripe + 1, locations);
        }
        if num_sub_chunks == 1 {
            return;
        }
        let alpha = self.alpha[sub_stripe as usize];
        if lon < lon_min + alpha {
            let (overlap_chunk, overlap_sub_chunk) = if sub_chunk == 0 {
                (num_chunks - 1, num_sub_chunks - 1)
            } else {
                ((sub_chunk - 1) / num_sub_chunks_per_chunk, sub_chunk - 1)
            };
            if want(self.get_chunk_id(stripe, overlap_chunk)) {
                locations.push(ChunkLocation {
                    chunk_id: self.get_chunk_id(stripe, overlap_chunk) as ChunkId,
                    sub_chunk_id: self.get_sub_chunk_id(stripe, sub_stripe, overlap_chunk, overlap_sub_chunk)
                        as SubChunkId,
                    overlap: true,
                });
            }
        }
        if lon > lon_max - alpha {
            let (overlap_chunk, overlap_sub_chunk) = if sub_chunk == num_sub_chunks - 1 {
                (0, 0)
            } else {
                ((sub_chunk + 1) / num_sub_chunks_per_chunk, sub_chunk + 1)
            };
            if want(self.get_chunk_id(stripe, overlap_chunk)) {
                locations.push(ChunkLocation {
                    chunk_id: self.get_chunk_id(stripe, overlap_chunk) as ChunkId,
                    sub_chunk_id: self.get_sub_chunk_id(stripe, sub_stripe, overlap_chunk, overlap_sub_chunk)
                        as SubChunkId,
                    overlap: true,
                });
            }
        }
    }

    fn up_down_overlap(
        &self,
        lon: f64,
        chunk_id: Option<ChunkId>,
        sub_stripe: i32,
        locations: &mut Vec<ChunkLocation>,
    ) {
        let want = |id: i32| chunk_id.is_none() || chunk_id == Some(id as ChunkId);
        let stripe = sub_stripe / self.num_sub_stripes_per_stripe;
        let num_chunks = self.num_chunks_per_stripe[stripe as usize];
        let num_sub_chunks_per_chunk = self.num_sub_chunks_per_chunk[sub_stripe as usize];
        let num_sub_chunks = num_chunks * num_sub_chunks_per_chunk;
        let sub_chunk_width = self.sub_chunk_width[sub_stripe as usize];
        let alpha = self.alpha[sub_stripe as usize];

        let mut min_sub_chunk = ((lon - alpha) / sub_chunk_width).floor() as i32;
        let mut max_sub_chunk = ((lon + alpha) / sub_chunk_width).floor() as i32;
        if min_sub_chunk < 0 {
            min_sub_chunk += num_sub_chunks;
        }
        if max_sub_chunk >= num_sub_chunks {
            max_sub_chunk -= num_sub_chunks;
        }

        let mut push = |sub_chunk: i32, locations: &mut Vec<ChunkLocation>| {
            let chunk = sub_chunk / num_sub_chunks_per_chunk;
            if want(self.get_chunk_id(stripe, chunk)) {
                locations.push(ChunkLocation {
                    chunk_id: self.get_chunk_id(stripe, chunk) as ChunkId,
                    sub_chunk_id: self.get_sub_chunk_id(stripe, sub_stripe, chunk, sub_chunk) as SubChunkId,
                    overlap: true,
                });
            }
        };

        if min_sub_chunk > max_sub_chunk {
            for sub_chunk in min_sub_chunk..num_sub_chunks {
                push(sub_chunk, locations);
            }
            min_sub_chunk = 0;
        }
        for sub_chunk in min_sub_chunk..=max_sub_chunk {
            push(sub_chunk, locations);
        }
    }

    /// IDs of every chunk overlapping `region` and belonging to `node`
    /// (`hash(chunkId) mod numNodes == node`).
    pub fn get_chunks_in(&self, region: &SphericalBox, node: u32, num_nodes: u32) -> Result<Vec<ChunkId>> {
        if num_nodes == 0 {
            return Err(CoreError::InvalidArgument(
                "there must be at least one node to assign chunks to".into(),
            ));
        }
        if node >= num_nodes {
            return Err(CoreError::InvalidArgument(
                "node number must be in range [0, numNodes)".into(),
            ));
        }
        let min_stripe = self.get_stripe(self.locate(0.0, region.lat_min).chunk_id as i32);
        let max_stripe = self.get_stripe(self.locate(0.0, region.lat_max).chunk_id as i32);
        let mut chunks = Vec::new();
        for stripe in min_stripe..=max_stripe {
            for chunk in 0..self.num_chunks_per_stripe[stripe as usize] {
                let chunk_id = self.get_chunk_id(stripe, chunk) as ChunkId;
                if hash(chunk_id) % num_nodes == node {
                    let bounds = self.get_chunk_bounds(chunk_id);
                    if region.intersects(&bounds) {
                        chunks.push(chunk_id);
                    }
                }
            }
        }
        Ok(chunks)
    }

    /// IDs of every non-overlap sub-chunk of `chunk_id`.
    pub fn get_sub_chunks(&self, chunk_id: ChunkId) -> Vec<SubChunkId> {
        let stripe = self.get_stripe(chunk_id as i32);
        let base_sub_stripe = stripe * self.num_sub_stripes_per_stripe;
        let mut sub_chunks = Vec::new();
        for ss in 0..self.num_sub_stripes_per_stripe {
            let sub_stripe = (base_sub_stripe + ss) as usize;
            for sc in 0..self.num_sub_chunks_per_chunk[sub_stripe] {
                sub_chunks.push((ss * self.max_sub_chunks_per_chunk + sc) as SubChunkId);
            }
        }
        sub_chunks
    }
}

/// CLI-accepted partitioner options.
#[derive(Debug, Clone)]
pub struct PartitionerOptions {
    pub num_stripes: i32,
    pub num_sub_stripes: i32,
    pub overlap: f64,
    pub prefix: String,
}

impl Default for PartitionerOptions {
    fn default() -> Self {
        Self {
            num_stripes: 18,
            num_sub_stripes: 100,
            overlap: 0.01,
            prefix: "chunk".to_string(),
        }
    }
}

/// `<prefix>_<chunkId>.txt` / `<prefix>_<chunkId>_overlap.txt`, placed in
/// `node_<nnnnn>/` with `nnnnn = hash(chunkId) mod numNodes` zero-padded to
/// 5 digits.
pub fn chunk_file_name(prefix: &str, chunk_id: ChunkId, overlap: bool, num_nodes: u32) -> String {
    let node = hash(chunk_id) % num_nodes.max(1);
    let suffix = if overlap { "_overlap" } else { "" };
    format!("node_{:05}/{}_{}{}.txt", node, prefix, chunk_id, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_boundary_at_pole() {
        assert_eq!(segments(89.9997, 90.0, 10.0), 1);
    }

    #[test]
    fn locate_is_within_its_own_bounds() {
        let chunker = Chunker::new(0.01, 18, 100).unwrap();
        for &(lon, lat) in &[(0.0, 0.0), (359.9, 45.0), (10.0, -89.0), (180.0, 89.0)] {
            let loc = chunker.locate(lon, lat);
            let chunk_box = chunker.get_chunk_bounds(loc.chunk_id);
            let sub_box = chunker.get_sub_chunk_bounds(loc.chunk_id, loc.sub_chunk_id);
            assert!(lat >= chunk_box.lat_min - 1e-9 && lat <= chunk_box.lat_max + 1e-9);
            assert!(lat >= sub_box.lat_min - 1e-9 && lat <= sub_box.lat_max + 1e-9);
        }
    }

    #[test]
    fn locate_center_round_trips_to_same_chunk() {
        let chunker = Chunker::new(0.01, 18, 100).unwrap();
        let chunk_id = 40;
        let bounds = chunker.get_chunk_bounds(chunk_id);
        let (lon, lat) = bounds.center();
        assert_eq!(chunker.locate(lon, lat).chunk_id, chunk_id);
    }

    #[test]
    fn hash_mod_matches_get_chunks_in_filter() {
        let chunker = Chunker::new(0.01, 18, 100).unwrap();
        let whole_sky = SphericalBox::new(0.0, 360.0, -90.0, 90.0);
        let num_nodes = 7;
        for node in 0..num_nodes {
            let chunks = chunker.get_chunks_in(&whole_sky, node, num_nodes).unwrap();
            for c in chunks {
                assert_eq!(hash(c) % num_nodes, node);
            }
        }
    }

    #[test]
    fn zero_overlap_yields_one_location() {
        let chunker = Chunker::new(0.0, 18, 100).unwrap();
        let mut locations = Vec::new();
        chunker.locate_with_overlap(15.0, 15.0, None, &mut locations);
        assert_eq!(locations.len(), 1);
        assert!(!locations[0].overlap);
    }

    #[test]
    fn rejects_invalid_stripe_counts() {
        assert!(Chunker::new(0.01, 0, 100).is_err());
        assert!(Chunker::new(0.01, 18, 0).is_err());
        assert!(Chunker::new(11.0, 18, 100).is_err());
    }

    #[test]
    fn rejects_overlap_exceeding_sub_stripe_height() {
        assert!(Chunker::new(5.0, 1, 1).is_err());
    }

    #[test]
    fn chunk_file_name_zero_pads_node() {
        let name = chunk_file_name("chunk", 42, false, 100);
        assert!(name.starts_with("node_"));
        assert!(name.contains("chunk_42.txt"));
    }
}
