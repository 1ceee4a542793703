use crate::core::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

const MAGIC: &[u8; 4] = b"DFIX";
const FORMAT_VERSION: u32 = 1;

/// magic + version + dimension + count + sha256(paths)
const HEADER_SIZE: usize = 4 + 4 + 4 + 4 + 32;

/// Flat inner-product index over L2-normalized vectors, with the ordered path
/// sequence it was built from. Position `i` in `vectors` belongs to `paths[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
    paths: Vec<String>,
}

impl FlatIndex {
    /// Build an index from `(path, vector)` pairs. Every vector must have the
    /// same dimension and no path may repeat.
    pub fn build(entries: Vec<(String, Vec<f32>)>) -> Result<Self> {
        let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut vectors = Vec::with_capacity(dimension * entries.len());
        let mut paths = Vec::with_capacity(entries.len());
        let mut seen = std::collections::HashSet::with_capacity(entries.len());

        for (path, vector) in entries {
            if vector.len() != dimension {
                return Err(Error::Index(format!(
                    "Vector for {} has dimension {}, expected {}",
                    path,
                    vector.len(),
                    dimension
                )));
            }
            if !seen.insert(path.clone()) {
                return Err(Error::Index(format!("Duplicate path in index: {}", path)));
            }
            vectors.extend(vector);
            paths.push(path);
        }

        Ok(Self {
            dimension,
            vectors,
            paths,
        })
    }

    pub fn empty() -> Self {
        Self {
            dimension: 0,
            vectors: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Path stored at an ordinal, if in bounds
    pub fn path(&self, ordinal: usize) -> Option<&str> {
        self.paths.get(ordinal).map(String::as_str)
    }

    fn vector(&self, ordinal: usize) -> &[f32] {
        &self.vectors[ordinal * self.dimension..(ordinal + 1) * self.dimension]
    }

    /// Exhaustive top-k by inner product. Returns `(ordinal, score)` pairs,
    /// best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::Index(format!(
                "Query has dimension {}, index has {}",
                query.len(),
                self.dimension
            )));
        }

        let mut heap: BinaryHeap<Scored> = BinaryHeap::with_capacity(k + 1);
        for ordinal in 0..self.len() {
            let score = inner_product(query, self.vector(ordinal));
            heap.push(Scored(ordinal, score));
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut results: Vec<(usize, f32)> = heap.into_iter().map(|s| (s.0, s.1)).collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        Ok(results)
    }

    /// Write both artifacts. Each is written to a temporary sibling and renamed
    /// into place, so a failure leaves the previous version intact.
    pub fn save(&self, index_path: &Path, paths_path: &Path) -> Result<()> {
        for path in [index_path, paths_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let paths_json = serde_json::to_vec(&self.paths)?;
        let digest = Sha256::digest(&paths_json);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&digest);
        bytes.extend_from_slice(bytemuck::cast_slice(&self.vectors));

        let index_tmp = index_path.with_extension("bin.tmp");
        let paths_tmp = paths_path.with_extension("json.tmp");
        std::fs::write(&index_tmp, &bytes)?;
        std::fs::write(&paths_tmp, &paths_json)?;
        std::fs::rename(&index_tmp, index_path)?;
        std::fs::rename(&paths_tmp, paths_path)?;
        Ok(())
    }

    /// Read both artifacts, verifying they were written together
    pub fn load(index_path: &Path, paths_path: &Path) -> Result<Self> {
        let bytes = std::fs::read(index_path)?;
        let paths_json = std::fs::read(paths_path)?;

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(Error::Index(format!(
                "{} is not a docfinder index",
                index_path.display()
            )));
        }

        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(Error::Index(format!("Unsupported index format version {}", version)));
        }
        let dimension = read_u32(&bytes[8..12]) as usize;
        let count = read_u32(&bytes[12..16]) as usize;

        if Sha256::digest(&paths_json).as_slice() != &bytes[16..HEADER_SIZE] {
            return Err(Error::Index(
                "Index and path sequence were not written together".to_string(),
            ));
        }

        let body = &bytes[HEADER_SIZE..];
        if body.len() != dimension * count * 4 {
            return Err(Error::Index(format!(
                "Index body has {} bytes, expected {}",
                body.len(),
                dimension * count * 4
            )));
        }

        let paths: Vec<String> = serde_json::from_slice(&paths_json)?;
        if paths.len() != count {
            return Err(Error::Index(format!(
                "Path sequence has {} entries, index has {}",
                paths.len(),
                count
            )));
        }

        Ok(Self {
            dimension,
            vectors: bytemuck::pod_collect_to_vec(body),
            paths,
        })
    }
}

/// True when both artifacts are present
pub fn artifacts_exist(index_path: &Path, paths_path: &Path) -> bool {
    index_path.exists() && paths_path.exists()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// L2-normalize in place. Near-zero vectors are left unchanged.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Min-heap entry for top-k selection
struct Scored(usize, f32);

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1 && self.0 == other.0
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the lowest score; ties evict the later ordinal.
        other
            .1
            .partial_cmp(&self.1)
            .unwrap_or(Ordering::Equal)
            .then(self.0.cmp(&other.0))
    }
}
