use std::io::Write;
use std::path::Path;

use super::PlyError;
use crate::pointcloud::{PointCloud, PointCloudError};

fn check_attribute(name: &str, expected: usize, actual: usize) -> Result<(), PlyError> {
    if actual != expected {
        return Err(PointCloudError::AttributeLength {
            name: name.to_string(),
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Write a point cloud as a `binary_little_endian` PLY file.
///
/// Coordinates, normals and scalar fields are stored as doubles, colors as
/// unsigned bytes. Whitespace in scalar field names is replaced by `_`.
pub fn write_ply_binary(path: impl AsRef<Path>, cloud: &PointCloud) -> Result<(), PlyError> {
    let path = path.as_ref();

    if let Some(colors) = cloud.colors() {
        check_attribute("colors", cloud.len(), colors.len())?;
    }
    if let Some(normals) = cloud.normals() {
        check_attribute("normals", cloud.len(), normals.len())?;
    }
    for sf in cloud.scalar_fields() {
        check_attribute(&sf.name, cloud.len(), sf.values.len())?;
    }

    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);

    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    if !cloud.name().is_empty() {
        writeln!(writer, "comment name {}", cloud.name())?;
    }
    writeln!(writer, "element vertex {}", cloud.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property double {axis}")?;
    }
    if cloud.colors().is_some() {
        for channel in ["red", "green", "blue"] {
            writeln!(writer, "property uchar {channel}")?;
        }
    }
    if cloud.normals().is_some() {
        for axis in ["nx", "ny", "nz"] {
            writeln!(writer, "property double {axis}")?;
        }
    }
    for sf in cloud.scalar_fields() {
        let name = sf.name.split_whitespace().collect::<Vec<_>>().join("_");
        writeln!(writer, "property double {name}")?;
    }
    writeln!(writer, "end_header")?;

    for (i, point) in cloud.points().iter().enumerate() {
        for v in point {
            writer.write_all(&v.to_le_bytes())?;
        }
        if let Some(colors) = cloud.colors() {
            writer.write_all(&colors[i])?;
        }
        if let Some(normals) = cloud.normals() {
            for v in &normals[i] {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        for sf in cloud.scalar_fields() {
            writer.write_all(&sf.values[i].to_le_bytes())?;
        }
    }
    writer.flush()?;

    log::debug!("Wrote {} points to {}", cloud.len(), path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ply::read_ply;

    #[test]
    fn test_write_read_ply() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("cloud.ply");

        let mut cloud = PointCloud::new(
            vec![[0.0, 1.0, 2.0], [-1.5, 1e-3, 7.25]],
            Some(vec![[10, 20, 30], [255, 0, 128]]),
            Some(vec![[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]),
        );
        cloud.add_scalar_field("return intensity", vec![0.25, 12.0])?;

        write_ply_binary(&file_path, &cloud)?;
        let read = read_ply(&file_path)?;

        assert_eq!(read.name(), "cloud");
        assert_eq!(read.points(), cloud.points());
        assert_eq!(read.colors(), cloud.colors());
        assert_eq!(read.normals(), cloud.normals());
        let sf = read
            .scalar_field("return_intensity")
            .ok_or("missing scalar field")?;
        assert_eq!(sf.values, vec![0.25, 12.0]);

        Ok(())
    }

    #[test]
    fn test_write_mismatched_attributes() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("broken.ply");

        let cloud = PointCloud::new(vec![[0.0; 3], [1.0; 3]], Some(vec![[1, 2, 3]]), None);
        let res = write_ply_binary(&file_path, &cloud);
        assert!(matches!(
            res,
            Err(PlyError::PointCloud(PointCloudError::AttributeLength {
                expected: 2,
                actual: 1,
                ..
            }))
        ));
        assert!(!file_path.exists());

        let cloud = PointCloud::new(vec![[0.0; 3]], None, Some(vec![[0.0; 3]; 3]));
        assert!(write_ply_binary(&file_path, &cloud).is_err());

        Ok(())
    }

    #[test]
    fn test_write_points_only() -> Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("bare.ply");

        let cloud = PointCloud::new(vec![[1.0, 2.0, 3.0]], None, None);
        write_ply_binary(&file_path, &cloud)?;

        let bytes = std::fs::read(&file_path)?;
        let header = b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty double x\nproperty double y\nproperty double z\nend_header\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(bytes.len(), header.len() + 3 * 8);

        Ok(())
    }
}
