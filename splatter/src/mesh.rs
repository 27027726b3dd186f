use std::cmp::{Ord, Ordering};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::io::BufReader;
use std::path::Path;

use derive_more::{Add, AddAssign};
use log::{info, warn};
use petgraph::unionfind::UnionFind;
use structopt::StructOpt;

use crate::misc::{Matrix4, Point3, Vector3, Vector4};
use crate::ply;
use base::defs::{Error, ErrorKind::*, Result};
use base::util::fs;

pub type Color = [u8; 3];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3>,
    pub faces: Vec<[usize; 3]>,
    pub colors: Vec<Color>,
}

#[derive(Clone, Debug, StructOpt)]
pub struct MeshParams {
    #[structopt(
        help = "Decimate until the mesh has at most this many vertices",
        long,
        default_value = "1000000"
    )]
    pub target_vertex_count: usize,

    #[structopt(
        help = "Fraction of faces kept by every decimation pass",
        long,
        default_value = "0.5"
    )]
    pub reduction_ratio: f64,

    #[structopt(
        help = "Scale vertex positions by the scale factor",
        long,
        parse(try_from_str),
        default_value = "true"
    )]
    pub standardize: bool,

    #[structopt(
        help = "World scale factor shared by the mesh and the cameras",
        long,
        default_value = "0.1"
    )]
    pub scale_factor: f64,

    #[structopt(
        help = "Vertex color brightness multiplier",
        long,
        default_value = "8.0"
    )]
    pub brightness: f64,
}

impl Default for MeshParams {
    fn default() -> Self {
        Self {
            target_vertex_count: 1000000,
            reduction_ratio: 0.5,
            standardize: true,
            scale_factor: 0.1,
            brightness: 8.0,
        }
    }
}

impl Mesh {
    /// Reads a mesh and brings it to the working size and world scale.
    ///
    /// Brightness is not applied here, so that the result can be cached.
    pub fn load<P: AsRef<Path>>(path: P, params: &MeshParams) -> Result<Mesh> {
        let path = path.as_ref();
        if !(0.0 < params.reduction_ratio && params.reduction_ratio < 1.0) {
            let desc = format!(
                "reduction ratio {} must be within (0, 1)",
                params.reduction_ratio
            );
            return Err(Error::new(MalformedData, desc));
        }

        let mut mesh = Self::reload(path)?;
        info!(
            "loaded mesh '{}' with {} vertices and {} faces",
            path.display(),
            mesh.vertices.len(),
            mesh.faces.len()
        );

        mesh = mesh.decimate_to_target(
            params.target_vertex_count,
            params.reduction_ratio,
        );

        if params.standardize {
            mesh.scale(params.scale_factor);
        }

        mesh.validate().map_err(|err| {
            let desc = format!("failed to decimate mesh '{}'", path.display());
            err.rekind(LoadError, desc)
        })?;
        Ok(mesh)
    }

    /// Reads a mesh as is (e.g. one written by `save`).
    pub fn reload<P: AsRef<Path>>(path: P) -> Result<Mesh> {
        let path = path.as_ref();
        let load_err = |err: Error| {
            let desc = format!("failed to load mesh '{}'", path.display());
            err.rekind(LoadError, desc)
        };

        let file = fs::open_file(path).map_err(load_err)?;
        let mesh = ply::read_ply(BufReader::new(file)).map_err(load_err)?;
        mesh.validate().map_err(load_err)?;
        Ok(mesh)
    }

    /// Loads and decimates the mesh, or reuses a previously decimated one.
    pub fn load_or_reload(
        path: &Path,
        cache_path: &Path,
        reload: bool,
        params: &MeshParams,
    ) -> Result<Mesh> {
        if reload {
            let mesh = Self::reload(cache_path)?;
            info!("reloaded decimated mesh '{}'", cache_path.display());
            return Ok(mesh);
        }

        let mesh = Self::load(path, params)?;
        if let Some(dir) = cache_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::ensure_dir(dir)?;
            }
        }
        mesh.save(cache_path)?;
        Ok(mesh)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut data = Vec::new();
        ply::write_ply(self, &mut data)?;
        fs::write_file(path, &data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.faces.is_empty() {
            let desc = "mesh has no vertices or faces".to_string();
            return Err(Error::new(LoadError, desc));
        }

        if self.colors.len() != self.vertices.len() {
            let desc = format!(
                "mesh has {} colors for {} vertices",
                self.colors.len(),
                self.vertices.len()
            );
            return Err(Error::new(LoadError, desc));
        }

        for (i, face) in self.faces.iter().enumerate() {
            if face.iter().any(|&v| v >= self.vertices.len()) {
                let desc = format!(
                    "face {} refers to a missing vertex ({:?})",
                    i, face
                );
                return Err(Error::new(LoadError, desc));
            }
        }

        Ok(())
    }

    /// Repeats fixed-ratio decimation while the mesh exceeds the target.
    ///
    /// Stops early when a pass fails to remove any vertex.
    pub fn decimate_to_target(mut self, target: usize, ratio: f64) -> Mesh {
        while self.vertices.len() > target {
            let num_before = self.vertices.len();
            self = self.decimate(ratio);
            info!("number of vertices is {}", self.vertices.len());

            if self.vertices.len() >= num_before {
                warn!(
                    "decimation stalled at {} vertices (target {})",
                    num_before, target
                );
                break;
            }
        }
        self
    }

    pub fn decimate(self, ratio: f64) -> Mesh {
        Decimator::execute(self, ratio)
    }

    /// Uniformly scales vertex positions.
    pub fn scale(&mut self, factor: f64) {
        for vertex in self.vertices.iter_mut() {
            vertex.coords *= factor;
        }
    }

    pub fn apply_brightness(&mut self, multiplier: f64) {
        for color in self.colors.iter_mut() {
            for c in color.iter_mut() {
                *c = (*c as f64 * multiplier).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    pub fn with_colors(&self, colors: Vec<Color>) -> Result<Mesh> {
        if colors.len() != self.vertices.len() {
            let desc = format!(
                "got {} colors for {} vertices",
                colors.len(),
                self.vertices.len()
            );
            return Err(Error::new(AggregationError, desc));
        }

        Ok(Mesh {
            vertices: self.vertices.clone(),
            faces: self.faces.clone(),
            colors,
        })
    }

    /// Area-weighted vertex normals (zero for isolated vertices).
    pub fn vertex_normals(&self) -> Vec<Vector3> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for &[v0, v1, v2] in &self.faces {
            let diff1 = self.vertices[v1] - self.vertices[v0];
            let diff2 = self.vertices[v2] - self.vertices[v0];
            let n = diff1.cross(&diff2);
            normals[v0] += n;
            normals[v1] += n;
            normals[v2] += n;
        }

        for n in normals.iter_mut() {
            let norm = n.norm();
            if norm > 0.0 {
                *n /= norm;
            }
        }
        normals
    }
}

#[derive(Add, AddAssign, Copy, Clone)]
struct Quadric(Matrix4);

impl Quadric {
    // Chosen by the Blender devs and represents a value
    // below which the optimization problem is too unstable.
    const OPTIMIZE_EPS: f64 = 1e-8;

    pub fn make_planar(p: Vector3, n: Vector3) -> Quadric {
        let plane = Vector4::new(n[0], n[1], n[2], -p.dot(&n));
        Quadric(plane * plane.transpose())
    }

    pub fn optimum(&self) -> Option<Vector3> {
        let a = self.0.fixed_slice::<3, 3>(0, 0);
        if a.determinant().abs() > Self::OPTIMIZE_EPS {
            let b = self.0.fixed_slice::<3, 1>(0, 3);
            a.cholesky().map(|c| -c.solve(&b))
        } else {
            None
        }
    }

    pub fn eval(&self, p: Vector3) -> f64 {
        let v = Vector4::new(p[0], p[1], p[2], 1.0);
        v.dot(&(self.0 * v))
    }

    pub fn zero() -> Quadric {
        Quadric(nalgebra::zero())
    }
}

struct Candidate {
    cost: f64,             // Cost of contraction.
    edge: [usize; 2],      // Edge to be contracted.
    point: Vector3,        // Optimal point of contraction.
    timestamp: [usize; 2], // Used to identify and discard obsolete candidates.
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost.total_cmp(&other.cost).reverse()
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Quadric error metric edge collapse.
pub struct Decimator {
    mesh: Mesh,
    vertex_colors: Vec<Vector3>,
    vertex_quadrics: Vec<Quadric>,
    vertex_partition: UnionFind<usize>,
    vertex_partition_sizes: Vec<usize>,
    vertices_around_vertex: Vec<HashSet<usize>>,
    faces_around_vertex: Vec<Vec<usize>>,
    face_alive: Vec<bool>,
    num_live_faces: usize,
    edge_heap: BinaryHeap<Candidate>,
}

impl Decimator {
    pub fn execute(mesh: Mesh, ratio: f64) -> Mesh {
        assert!(0.0 < ratio && ratio <= 1.0);

        let mut d = Decimator::new(mesh);

        let mut faces_to_remove =
            (d.num_live_faces as f64 * (1.0 - ratio)) as usize;
        while faces_to_remove > 0 {
            let c = match d.edge_heap.pop() {
                Some(c) => c,
                None => break,
            };
            if let Some(removed) = d.try_contract(c.point, c.edge, c.timestamp)
            {
                faces_to_remove = faces_to_remove.saturating_sub(removed);
            }
        }

        d.finalize()
    }

    fn new(mesh: Mesh) -> Decimator {
        // Build metrics for cost computations.
        let mut vertex_quadrics = vec![Quadric::zero(); mesh.vertices.len()];
        for &[v0, v1, v2] in &mesh.faces {
            let v_mid = (mesh.vertices[v0].coords
                + mesh.vertices[v1].coords
                + mesh.vertices[v2].coords)
                / 3.0;
            let diff1 = mesh.vertices[v1] - mesh.vertices[v0];
            let diff2 = mesh.vertices[v2] - mesh.vertices[v0];
            let cross = diff1.cross(&diff2);
            if cross.norm() <= f64::EPSILON {
                continue; // Degenerate face has no plane.
            }
            let q = Quadric::make_planar(v_mid, cross.normalize());
            vertex_quadrics[v0] += q;
            vertex_quadrics[v1] += q;
            vertex_quadrics[v2] += q;
        }

        let vertex_colors = mesh
            .colors
            .iter()
            .map(|c| Vector3::new(c[0] as f64, c[1] as f64, c[2] as f64))
            .collect();

        // Initialize partition of the vertex indices.
        let vertex_partition = UnionFind::new(mesh.vertices.len());
        let vertex_partition_sizes = vec![1; mesh.vertices.len()];

        // Initialize a simple topology cache.
        let mut vertices_around_vertex =
            vec![HashSet::new(); mesh.vertices.len()];
        for &[v0, v1, v2] in &mesh.faces {
            vertices_around_vertex[v0].insert(v1);
            vertices_around_vertex[v0].insert(v2);
            vertices_around_vertex[v1].insert(v0);
            vertices_around_vertex[v1].insert(v2);
            vertices_around_vertex[v2].insert(v0);
            vertices_around_vertex[v2].insert(v1);
        }

        // Faces with repeated vertices never count as live.
        let face_alive: Vec<bool> = mesh
            .faces
            .iter()
            .map(|&[v0, v1, v2]| v0 != v1 && v0 != v2 && v1 != v2)
            .collect();
        let num_live_faces = face_alive.iter().filter(|&&a| a).count();
        let mut faces_around_vertex = vec![Vec::new(); mesh.vertices.len()];
        for (f, face) in mesh.faces.iter().enumerate() {
            if face_alive[f] {
                for &v in face {
                    faces_around_vertex[v].push(f);
                }
            }
        }

        let mut decimator = Decimator {
            mesh,
            vertex_colors,
            vertex_quadrics,
            vertex_partition,
            vertex_partition_sizes,
            vertices_around_vertex,
            faces_around_vertex,
            face_alive,
            num_live_faces,
            edge_heap: BinaryHeap::new(),
        };

        // Put all edges in the decimator queue.
        for &[v0, v1, v2] in &decimator.mesh.faces {
            for edge in [[v0, v1], [v0, v2], [v1, v2]] {
                if edge[0] == edge[1] {
                    continue;
                }
                let (point, cost) = decimator.optimize_single_edge(edge);
                let timestamp = decimator.edge_timestamp(edge);
                decimator.edge_heap.push(Candidate {
                    cost,
                    edge,
                    point,
                    timestamp,
                });
            }
        }

        decimator
    }

    fn optimize_single_edge(&self, e: [usize; 2]) -> (Vector3, f64) {
        let quadric = self.vertex_quadrics[e[0]] + self.vertex_quadrics[e[1]];
        let point = if let Some(p) = quadric.optimum() {
            p
        } else {
            let p0 = self.mesh.vertices[e[0]];
            let p1 = self.mesh.vertices[e[1]];
            (p0.coords + p1.coords) / 2.0
        };
        (point, quadric.eval(point))
    }

    fn edge_timestamp(&self, e: [usize; 2]) -> [usize; 2] {
        [
            self.vertex_partition_sizes[e[0]],
            self.vertex_partition_sizes[e[1]],
        ]
    }

    /// Live faces that would collapse if the edge were contracted.
    fn faces_on_edge(&self, [v0, v1]: [usize; 2]) -> Vec<usize> {
        self.faces_around_vertex[v0]
            .iter()
            .copied()
            .filter(|&f| {
                self.face_alive[f]
                    && self.mesh.faces[f]
                        .iter()
                        .any(|&w| self.vertex_partition.find(w) == v1)
            })
            .collect()
    }

    /// Returns the number of removed faces, or `None` if the candidate
    /// is obsolete or its contraction would leave the mesh without faces.
    fn try_contract(
        &mut self,
        point: Vector3,
        edge: [usize; 2],
        ts: [usize; 2],
    ) -> Option<usize> {
        if !self.validate_timestamp(edge, ts) {
            return None;
        }

        let [v0, v1] = edge;
        assert!(v0 != v1);

        let dying = self.faces_on_edge(edge);
        if dying.len() >= self.num_live_faces {
            return None;
        }
        for &f in &dying {
            self.face_alive[f] = false;
        }
        self.num_live_faces -= dying.len();

        let (s0, s1) = (
            self.vertex_partition_sizes[v0],
            self.vertex_partition_sizes[v1],
        );
        let color = (self.vertex_colors[v0] * s0 as f64
            + self.vertex_colors[v1] * s1 as f64)
            / (s0 + s1) as f64;

        // One of the memory locations v0 and v1 will be reused
        // for the new vertex v. The other location will be unused.
        self.vertex_partition.union(v0, v1);
        let v = self.vertex_partition.find(v0);

        self.vertex_partition_sizes[v] = s0 + s1;
        self.mesh.vertices[v] = Point3::from(point);
        self.vertex_colors[v] = color;
        self.vertex_quadrics[v] =
            self.vertex_quadrics[v0] + self.vertex_quadrics[v1];
        self.vertices_around_vertex[v] = self.vertices_around_vertex[v0]
            .union(&self.vertices_around_vertex[v1])
            .map(|&w| self.vertex_partition.find(w))
            .collect();
        self.vertices_around_vertex[v].remove(&v0);
        self.vertices_around_vertex[v].remove(&v1);

        let mut faces = std::mem::take(&mut self.faces_around_vertex[v0]);
        faces.append(&mut std::mem::take(&mut self.faces_around_vertex[v1]));
        faces.retain(|&f| self.face_alive[f]);
        self.faces_around_vertex[v] = faces;

        for &v2 in &self.vertices_around_vertex[v] {
            let edge = [v, v2];
            let (point, cost) = self.optimize_single_edge(edge);
            let timestamp = self.edge_timestamp(edge);
            self.edge_heap.push(Candidate {
                cost,
                edge,
                point,
                timestamp,
            });
        }

        Some(dying.len())
    }

    fn validate_timestamp(&self, edge: [usize; 2], ts: [usize; 2]) -> bool {
        edge[0] == self.vertex_partition.find(edge[0])
            && edge[1] == self.vertex_partition.find(edge[1])
            && edge[0] != edge[1]
            && self.edge_timestamp(edge) == ts
    }

    fn finalize(self) -> Mesh {
        let mut kept_indices = self.vertex_partition.clone().into_labeling();
        kept_indices.sort_unstable();
        kept_indices.dedup();
        let new_indices = HashMap::<usize, usize>::from_iter(
            kept_indices.iter().enumerate().map(|(i, &j)| (j, i)),
        );

        let vertices: Vec<Point3> = kept_indices
            .iter()
            .map(|&i| self.mesh.vertices[i])
            .collect();
        let colors: Vec<Color> = kept_indices
            .iter()
            .map(|&i| {
                let c = self.vertex_colors[i];
                [0, 1, 2].map(|k| c[k].round().clamp(0.0, 255.0) as u8)
            })
            .collect();
        let mut faces: Vec<[usize; 3]> = self
            .mesh
            .faces
            .iter()
            .map(|&[v0, v1, v2]| {
                [
                    new_indices[&self.vertex_partition.find(v0)],
                    new_indices[&self.vertex_partition.find(v1)],
                    new_indices[&self.vertex_partition.find(v2)],
                ]
            })
            .filter(|[v0, v1, v2]| v0 != v1 && v0 != v2 && v1 != v2)
            .collect();
        faces.sort_unstable();
        faces.dedup();

        Mesh {
            vertices,
            faces,
            colors,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Planar `n` x `n` vertex grid with two triangles per cell.
    pub fn grid_mesh(n: usize) -> Mesh {
        let mut mesh = Mesh::default();
        for i in 0..n {
            for j in 0..n {
                mesh.vertices.push(Point3::new(j as f64, i as f64, 0.0));
                mesh.colors.push([(i * 10) as u8, (j * 10) as u8, 100]);
            }
        }
        for i in 0..n - 1 {
            for j in 0..n - 1 {
                let v = i * n + j;
                mesh.faces.push([v, v + 1, v + n]);
                mesh.faces.push([v + 1, v + n + 1, v + n]);
            }
        }
        mesh
    }

    /// Five vertices and two triangles in the z = 0 plane.
    pub fn five_vertex_mesh() -> Mesh {
        Mesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(2.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2], [1, 4, 3]],
            colors: vec![[50, 50, 50]; 5],
        }
    }

    #[test]
    fn test_decimation_is_monotonic() {
        let mut mesh = grid_mesh(12);
        mesh.validate().unwrap();

        let mut counts = vec![mesh.vertices.len()];
        while mesh.vertices.len() > 20 {
            mesh = mesh.decimate(0.5);
            counts.push(mesh.vertices.len());
            if counts[counts.len() - 1] == counts[counts.len() - 2] {
                break;
            }
        }

        for pair in counts.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!(counts[1] < counts[0]);
        assert_eq!(mesh.colors.len(), mesh.vertices.len());
        for face in &mesh.faces {
            assert!(face.iter().all(|&v| v < mesh.vertices.len()));
        }
    }

    #[test]
    fn test_decimate_to_target_terminates() {
        let mesh = grid_mesh(10).decimate_to_target(3, 0.5);
        assert!(mesh.vertices.len() < 100);
        assert!(!mesh.vertices.is_empty());

        let mesh = grid_mesh(10).decimate_to_target(1000, 0.5);
        assert_eq!(mesh.vertices.len(), 100);
    }

    #[test]
    fn test_decimate_to_target_keeps_faces() {
        let mesh = grid_mesh(10).decimate_to_target(3, 0.5);
        assert!(!mesh.faces.is_empty());
        mesh.validate().unwrap();

        let mut data = Vec::new();
        ply::write_ply(&mesh, &mut data).unwrap();
        let reread = ply::read_ply(data.as_slice()).unwrap();
        reread.validate().unwrap();
        assert_eq!(reread.faces, mesh.faces);
    }

    #[test]
    fn test_decimate_single_triangle() {
        let mesh = Mesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2]],
            colors: vec![[0, 0, 0]; 3],
        };
        let decimated = mesh.clone().decimate_to_target(1, 0.5);
        assert_eq!(decimated, mesh);
    }

    #[test]
    fn test_decimation_blends_colors() {
        let mut mesh = grid_mesh(6);
        for c in mesh.colors.iter_mut() {
            *c = [40, 80, 120];
        }
        let mesh = mesh.decimate(0.5);
        assert!(mesh.colors.iter().all(|&c| c == [40, 80, 120]));
    }

    #[test]
    fn test_apply_brightness() {
        let mut mesh = five_vertex_mesh();
        mesh.colors[0] = [100, 100, 100];
        mesh.colors[1] = [100, 200, 0];
        mesh.apply_brightness(2.0);
        assert_eq!(mesh.colors[0], [200, 200, 200]);
        assert_eq!(mesh.colors[1], [200, 255, 0]);
    }

    #[test]
    fn test_scale() {
        let mut mesh = five_vertex_mesh();
        mesh.scale(0.1);
        assert_eq!(mesh.vertices[4], Point3::new(0.2, 0.1, 0.0));
    }

    #[test]
    fn test_validate() {
        let mut mesh = five_vertex_mesh();
        mesh.faces.push([0, 1, 5]);
        let err = mesh.validate().unwrap_err();
        assert_eq!(err.kind, LoadError);

        let err = Mesh::default().validate().unwrap_err();
        assert_eq!(err.kind, LoadError);
        assert_eq!(&err.description, "mesh has no vertices or faces");
    }

    #[test]
    fn test_vertex_normals() {
        let normals = five_vertex_mesh().vertex_normals();
        for n in normals {
            assert!((n - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);
        }
    }

    #[test]
    fn test_load_rejects_bad_ratio() {
        let params = MeshParams {
            reduction_ratio: 1.5,
            ..Default::default()
        };
        let err = Mesh::load("/no/such/mesh.ply", &params).unwrap_err();
        assert_eq!(err.kind, MalformedData);
    }

    #[test]
    fn test_load_or_reload_decimated() {
        let dir = std::env::temp_dir()
            .join(format!("splatter-mesh-{}", std::process::id()));
        fs::ensure_dir(&dir).unwrap();
        let path = dir.join("mesh.ply");
        let cache_path = dir.join("cache/decimated.ply");
        grid_mesh(10).save(&path).unwrap();

        let params = MeshParams {
            target_vertex_count: 40,
            ..Default::default()
        };
        let fresh =
            Mesh::load_or_reload(&path, &cache_path, false, &params).unwrap();
        assert!(fresh.vertices.len() <= 40);
        assert!(!fresh.faces.is_empty());

        let reloaded =
            Mesh::load_or_reload(&path, &cache_path, true, &params).unwrap();
        assert_eq!(reloaded, fresh);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let params = MeshParams::default();
        let err = Mesh::load("/no/such/mesh.ply", &params).unwrap_err();
        assert_eq!(err.kind, LoadError);
        assert_eq!(
            &err.description,
            "failed to load mesh '/no/such/mesh.ply'"
        );
    }
}
