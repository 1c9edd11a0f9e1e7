use std::io::{BufRead, Read};
use std::path::Path;

use super::{
    properties::{property_roles, PlyDataType, PlyFormat, PlyPropertyDefinition, PropertyRole},
    PlyError,
};
use crate::pointcloud::{PointCloud, PointCloudError};

struct PlyHeader {
    pub format: PlyFormat,
    pub vertex_count: usize,
    pub properties: Vec<PlyPropertyDefinition>,
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<PlyHeader, PlyError> {
    let mut line = String::new();
    let mut format = None;
    let mut vertex_count = None;
    let mut in_vertex_element = false;
    let mut properties = Vec::new();

    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(PlyError::MalformedHeader("missing magic number".to_string()));
    }

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(PlyError::MalformedHeader("missing end_header".to_string()));
        }
        let parts = line.split_whitespace().collect::<Vec<_>>();

        match parts.as_slice() {
            ["end_header"] => break,
            ["format", kind, _version] => format = Some(PlyFormat::from_header(kind)?),
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["element", "vertex", count] => {
                // vertex data is only reachable if it comes first in the body
                if vertex_count.is_some() {
                    return Err(PlyError::MalformedHeader("duplicate vertex element".to_string()));
                }
                let count = count
                    .parse()
                    .map_err(|_| PlyError::MalformedHeader(format!("bad vertex count {count}")))?;
                vertex_count = Some(count);
                in_vertex_element = true;
            }
            ["element", name, _count] => {
                if vertex_count.is_none() {
                    return Err(PlyError::UnsupportedProperty(format!(
                        "element {name} before vertex"
                    )));
                }
                in_vertex_element = false;
            }
            ["property", "list", ..] if in_vertex_element => {
                return Err(PlyError::UnsupportedProperty(line.trim().to_string()));
            }
            ["property", data_type, name] if in_vertex_element => {
                properties.push(PlyPropertyDefinition {
                    name: name.to_string(),
                    data_type: PlyDataType::from_name(data_type)?,
                });
            }
            ["property", ..] => {}
            _ => return Err(PlyError::MalformedHeader(line.trim().to_string())),
        }
    }

    let format = format.ok_or_else(|| PlyError::MalformedHeader("missing format".to_string()))?;
    let vertex_count =
        vertex_count.ok_or_else(|| PlyError::MalformedHeader("missing vertex element".to_string()))?;

    Ok(PlyHeader {
        format,
        vertex_count,
        properties,
    })
}

/// Accumulates vertex values into the cloud buffers.
struct VertexSink {
    roles: Vec<PropertyRole>,
    points: Vec<[f64; 3]>,
    colors: Option<Vec<[u8; 3]>>,
    normals: Option<Vec<[f64; 3]>>,
    scalars: Vec<Vec<f64>>,
}

impl VertexSink {
    fn new(properties: &[PlyPropertyDefinition], capacity: usize) -> Result<Self, PlyError> {
        let roles = property_roles(properties);
        for (axis, name) in ["x", "y", "z"].into_iter().enumerate() {
            if !roles.contains(&PropertyRole::Coordinate(axis)) {
                return Err(PlyError::MissingCoordinate(name));
            }
        }

        let has_colors = roles.iter().any(|r| matches!(r, PropertyRole::Color(_)));
        let has_normals = roles.iter().any(|r| matches!(r, PropertyRole::Normal(_)));
        let num_scalars = roles
            .iter()
            .filter(|r| matches!(r, PropertyRole::Scalar(_)))
            .count();

        let mut sink = Self {
            roles,
            points: Vec::new(),
            colors: has_colors.then(Vec::new),
            normals: has_normals.then(Vec::new),
            scalars: vec![Vec::new(); num_scalars],
        };
        sink.reserve(capacity)?;
        Ok(sink)
    }

    fn reserve(&mut self, capacity: usize) -> Result<(), PlyError> {
        self.points
            .try_reserve_exact(capacity)
            .map_err(PointCloudError::from)?;
        if let Some(colors) = self.colors.as_mut() {
            colors
                .try_reserve_exact(capacity)
                .map_err(PointCloudError::from)?;
        }
        if let Some(normals) = self.normals.as_mut() {
            normals
                .try_reserve_exact(capacity)
                .map_err(PointCloudError::from)?;
        }
        for values in self.scalars.iter_mut() {
            values
                .try_reserve_exact(capacity)
                .map_err(PointCloudError::from)?;
        }
        Ok(())
    }

    fn push(&mut self, values: impl Iterator<Item = f64>) {
        let mut point = [0.0; 3];
        let mut color = [0u8; 3];
        let mut normal = [0.0; 3];
        for (role, value) in self.roles.iter().zip(values) {
            match *role {
                PropertyRole::Coordinate(axis) => point[axis] = value,
                PropertyRole::Color(channel) => color[channel] = value.clamp(0.0, 255.0) as u8,
                PropertyRole::Normal(axis) => normal[axis] = value,
                PropertyRole::Scalar(i) => self.scalars[i].push(value),
            }
        }
        self.points.push(point);
        if let Some(colors) = self.colors.as_mut() {
            colors.push(color);
        }
        if let Some(normals) = self.normals.as_mut() {
            normals.push(normal);
        }
    }

    fn into_cloud(
        self,
        properties: &[PlyPropertyDefinition],
        name: String,
    ) -> Result<PointCloud, PlyError> {
        let mut cloud = PointCloud::new(self.points, self.colors, self.normals).with_name(name);
        let scalar_names = properties
            .iter()
            .zip(&self.roles)
            .filter(|(_, role)| matches!(role, PropertyRole::Scalar(_)))
            .map(|(p, _)| p.name.clone());
        for (sf_name, values) in scalar_names.zip(self.scalars) {
            cloud.add_scalar_field(sf_name, values)?;
        }
        Ok(cloud)
    }
}

/// Read a PLY file in `ascii` or `binary_little_endian` format.
///
/// `x`, `y` and `z` are required. `red`, `green`, `blue` become colors, `nx`,
/// `ny`, `nz` become normals and every other vertex property becomes a scalar
/// field. The cloud is named after the file stem.
pub fn read_ply(path: impl AsRef<Path>) -> Result<PointCloud, PlyError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = std::io::BufReader::new(file);
    let header = parse_header(&mut reader)?;

    // the header count is untrusted, the file cannot hold more vertices than its size allows
    let min_vertex_bytes: usize = match header.format {
        PlyFormat::BinaryLittleEndian => header.properties.iter().map(|p| p.data_type.size()).sum(),
        PlyFormat::Ascii => 2 * header.properties.len(),
    };
    let max_vertices = usize::try_from(file_len).unwrap_or(usize::MAX) / min_vertex_bytes.max(1);
    let mut sink = VertexSink::new(&header.properties, header.vertex_count.min(max_vertices))?;

    match header.format {
        PlyFormat::BinaryLittleEndian => {
            let stride = header.properties.iter().map(|p| p.data_type.size()).sum();
            let mut buffer = vec![0u8; stride];
            for _ in 0..header.vertex_count {
                reader.read_exact(&mut buffer)?;
                let mut offset = 0;
                sink.push(header.properties.iter().map(|p| {
                    let value = p.data_type.decode_le(&buffer[offset..]);
                    offset += p.data_type.size();
                    value
                }));
            }
        }
        PlyFormat::Ascii => {
            let mut line = String::new();
            for vertex in 0..header.vertex_count {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    return Err(PlyError::ParseValue(vertex));
                }
                let values = line
                    .split_whitespace()
                    .map(|v| v.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| PlyError::ParseValue(vertex))?;
                if values.len() < header.properties.len() {
                    return Err(PlyError::ParseValue(vertex));
                }
                sink.push(values.into_iter());
            }
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    log::debug!(
        "Read {} vertices with {} properties from {}",
        header.vertex_count,
        header.properties.len(),
        path.display()
    );

    sink.into_cloud(&header.properties, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_header_basic() {
        let header_text = "ply\nformat binary_little_endian 1.0\nelement vertex 10\nproperty float x\nproperty float y\nproperty float z\nend_header\n";
        let mut reader = std::io::BufReader::new(header_text.as_bytes());
        let header = parse_header(&mut reader).unwrap();
        assert_eq!(header.vertex_count, 10);
        assert_eq!(header.format, PlyFormat::BinaryLittleEndian);
        assert_eq!(header.properties.len(), 3);
        assert_eq!(header.properties[0].name, "x");
        assert_eq!(header.properties[0].data_type, PlyDataType::Float32);
    }

    #[test]
    fn test_parse_header_with_faces() {
        let header_text = "ply\nformat ascii 1.0\ncomment made by hand\nelement vertex 3\nproperty double x\nproperty double y\nproperty double z\nproperty uchar red\nelement face 1\nproperty list uchar int vertex_indices\nend_header\n";
        let mut reader = std::io::BufReader::new(header_text.as_bytes());
        let header = parse_header(&mut reader).unwrap();
        assert_eq!(header.vertex_count, 3);
        assert_eq!(header.format, PlyFormat::Ascii);
        assert_eq!(header.properties.len(), 4);
    }

    #[test]
    fn test_parse_header_errors() {
        let cases = [
            "plx\n",
            "ply\nformat binary_big_endian 1.0\nelement vertex 1\nend_header\n",
            "ply\nformat ascii 1.0\nelement face 1\nelement vertex 1\nend_header\n",
            "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n",
            "ply\nelement vertex 1\nproperty float x\nend_header\n",
        ];
        for header_text in cases {
            let mut reader = std::io::BufReader::new(header_text.as_bytes());
            assert!(parse_header(&mut reader).is_err(), "{header_text}");
        }
    }

    #[test]
    fn test_read_ply_binary() {
        let mut file = NamedTempFile::new().unwrap();
        let header = "ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nproperty float nx\nproperty float ny\nproperty float nz\nproperty float intensity\nend_header\n";
        file.write_all(header.as_bytes()).unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&1.0f32.to_le_bytes());
        data.extend_from_slice(&2.0f32.to_le_bytes());
        data.extend_from_slice(&3.0f32.to_le_bytes());
        data.push(255);
        data.push(128);
        data.push(0);
        data.extend_from_slice(&0.0f32.to_le_bytes());
        data.extend_from_slice(&1.0f32.to_le_bytes());
        data.extend_from_slice(&0.0f32.to_le_bytes());
        data.extend_from_slice(&0.5f32.to_le_bytes());
        file.write_all(&data).unwrap();

        let pointcloud = read_ply(file.path()).unwrap();
        assert_eq!(pointcloud.len(), 1);
        assert_eq!(pointcloud.points()[0], [1.0, 2.0, 3.0]);
        assert_eq!(pointcloud.colors().unwrap()[0], [255, 128, 0]);
        assert_eq!(pointcloud.normals().unwrap()[0], [0.0, 1.0, 0.0]);
        assert_eq!(
            pointcloud.scalar_field("intensity").unwrap().values,
            vec![0.5]
        );
    }

    #[test]
    fn test_read_ply_ascii() {
        let mut file = NamedTempFile::new().unwrap();
        let content = "ply\nformat ascii 1.0\nelement vertex 2\nproperty double x\nproperty double y\nproperty double z\nend_header\n0 0 0\n1.5 -2 3e2\n";
        file.write_all(content.as_bytes()).unwrap();

        let pointcloud = read_ply(file.path()).unwrap();
        assert_eq!(pointcloud.points(), &[[0.0, 0.0, 0.0], [1.5, -2.0, 300.0]]);
        assert!(pointcloud.colors().is_none());
        assert!(pointcloud.normals().is_none());
    }

    #[test]
    fn test_read_ply_ascii_truncated() {
        let mut file = NamedTempFile::new().unwrap();
        let content = "ply\nformat ascii 1.0\nelement vertex 2\nproperty double x\nproperty double y\nproperty double z\nend_header\n0 0 0\n";
        file.write_all(content.as_bytes()).unwrap();
        assert!(matches!(read_ply(file.path()), Err(PlyError::ParseValue(1))));
    }

    #[test]
    fn test_read_ply_oversized_vertex_count() {
        let header = |format: &str| {
            format!(
                "ply\nformat {format} 1.0\nelement vertex {}\nproperty double x\nproperty double y\nproperty double z\nend_header\n",
                usize::MAX
            )
        };

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(header("ascii").as_bytes()).unwrap();
        file.write_all(b"0 0 0\n").unwrap();
        assert!(matches!(read_ply(file.path()), Err(PlyError::ParseValue(1))));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(header("binary_little_endian").as_bytes()).unwrap();
        for v in [1.0f64, 2.0, 3.0] {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        assert!(matches!(read_ply(file.path()), Err(PlyError::Io(_))));
    }

    #[test]
    fn test_read_ply_missing_coordinate() {
        let mut file = NamedTempFile::new().unwrap();
        let content = "ply\nformat ascii 1.0\nelement vertex 1\nproperty double x\nproperty double y\nend_header\n0 0\n";
        file.write_all(content.as_bytes()).unwrap();
        assert!(matches!(
            read_ply(file.path()),
            Err(PlyError::MissingCoordinate("z"))
        ));
    }
}
