use super::PlyError;

/// Encoding of the PLY body.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyFormat {
    /// Whitespace separated values, one vertex per line.
    Ascii,
    /// Packed little endian values.
    BinaryLittleEndian,
}

impl PlyFormat {
    pub(crate) fn from_header(format: &str) -> Result<Self, PlyError> {
        match format {
            "ascii" => Ok(PlyFormat::Ascii),
            "binary_little_endian" => Ok(PlyFormat::BinaryLittleEndian),
            other => Err(PlyError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A scalar property of the vertex element.
#[derive(Debug, PartialEq, Clone)]
pub struct PlyPropertyDefinition {
    /// Property name.
    pub name: String,
    /// Storage type.
    pub data_type: PlyDataType,
}

/// Storage type of a PLY property.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlyDataType {
    /// 32 bits float.
    Float32,
    /// 64 bits float.
    Float64,
    /// Signed byte.
    Int8,
    /// Unsigned byte.
    UInt8,
    /// Signed 16 bits integer.
    Int16,
    /// Unsigned 16 bits integer.
    UInt16,
    /// Signed 32 bits integer.
    Int32,
    /// Unsigned 32 bits integer.
    UInt32,
}

impl PlyDataType {
    /// Parse a PLY type name, old style (`float`) or sized (`float32`).
    pub fn from_name(type_str: &str) -> Result<Self, PlyError> {
        match type_str {
            "float" | "float32" => Ok(PlyDataType::Float32),
            "double" | "float64" => Ok(PlyDataType::Float64),
            "char" | "int8" => Ok(PlyDataType::Int8),
            "uchar" | "uint8" => Ok(PlyDataType::UInt8),
            "short" | "int16" => Ok(PlyDataType::Int16),
            "ushort" | "uint16" => Ok(PlyDataType::UInt16),
            "int" | "int32" => Ok(PlyDataType::Int32),
            "uint" | "uint32" => Ok(PlyDataType::UInt32),
            other => Err(PlyError::UnsupportedProperty(other.to_string())),
        }
    }

    /// Size in bytes of one value.
    pub fn size(&self) -> usize {
        match self {
            PlyDataType::Float32 | PlyDataType::Int32 | PlyDataType::UInt32 => 4,
            PlyDataType::Float64 => 8,
            PlyDataType::Int16 | PlyDataType::UInt16 => 2,
            PlyDataType::Int8 | PlyDataType::UInt8 => 1,
        }
    }

    /// Decode one little endian value.
    ///
    /// PRECONDITION: `bytes` holds at least [`PlyDataType::size`] bytes.
    pub fn decode_le(&self, bytes: &[u8]) -> f64 {
        let mut raw = [0u8; 8];
        raw[..self.size()].copy_from_slice(&bytes[..self.size()]);
        match self {
            PlyDataType::Float32 => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            PlyDataType::Float64 => f64::from_le_bytes(raw),
            PlyDataType::Int8 => raw[0] as i8 as f64,
            PlyDataType::UInt8 => raw[0] as f64,
            PlyDataType::Int16 => i16::from_le_bytes([raw[0], raw[1]]) as f64,
            PlyDataType::UInt16 => u16::from_le_bytes([raw[0], raw[1]]) as f64,
            PlyDataType::Int32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            PlyDataType::UInt32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
        }
    }
}

/// Destination of a vertex property in the point cloud.
#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum PropertyRole {
    Coordinate(usize),
    Color(usize),
    Normal(usize),
    Scalar(usize),
}

/// Map every property to its destination, scalar fields numbered in order.
pub(crate) fn property_roles(properties: &[PlyPropertyDefinition]) -> Vec<PropertyRole> {
    let mut num_scalars = 0;
    properties
        .iter()
        .map(|p| match p.name.as_str() {
            "x" => PropertyRole::Coordinate(0),
            "y" => PropertyRole::Coordinate(1),
            "z" => PropertyRole::Coordinate(2),
            "red" | "r" => PropertyRole::Color(0),
            "green" | "g" => PropertyRole::Color(1),
            "blue" | "b" => PropertyRole::Color(2),
            "nx" => PropertyRole::Normal(0),
            "ny" => PropertyRole::Normal(1),
            "nz" => PropertyRole::Normal(2),
            _ => {
                num_scalars += 1;
                PropertyRole::Scalar(num_scalars - 1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parsing() {
        assert_eq!(PlyDataType::from_name("float").unwrap(), PlyDataType::Float32);
        assert_eq!(PlyDataType::from_name("uchar").unwrap(), PlyDataType::UInt8);
        assert_eq!(PlyDataType::from_name("float64").unwrap(), PlyDataType::Float64);
        assert!(PlyDataType::from_name("invalid").is_err());
    }

    #[test]
    fn test_decode_le() {
        assert_eq!(PlyDataType::Float32.decode_le(&1.5f32.to_le_bytes()), 1.5);
        assert_eq!(PlyDataType::Float64.decode_le(&(-2.25f64).to_le_bytes()), -2.25);
        assert_eq!(PlyDataType::Int8.decode_le(&[0xff]), -1.0);
        assert_eq!(PlyDataType::UInt16.decode_le(&513u16.to_le_bytes()), 513.0);
    }

    #[test]
    fn test_property_roles() {
        let props = ["x", "y", "z", "intensity", "red", "nx", "time"]
            .iter()
            .map(|name| PlyPropertyDefinition {
                name: name.to_string(),
                data_type: PlyDataType::Float32,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            property_roles(&props),
            vec![
                PropertyRole::Coordinate(0),
                PropertyRole::Coordinate(1),
                PropertyRole::Coordinate(2),
                PropertyRole::Scalar(0),
                PropertyRole::Color(0),
                PropertyRole::Normal(0),
                PropertyRole::Scalar(1),
            ]
        );
    }
}
