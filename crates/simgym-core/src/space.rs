//! Space descriptors

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GymError, Result};
use crate::wire::{NamedSpaceRecord, SpaceRecord};

/// Numeric element type of an array space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ElementKind {
    Int,
    UInt,
    Float,
    Double,
}

/// How unrecognized element-type tags are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtypePolicy {
    /// Fall back to single-precision float, kept for wire compatibility
    #[default]
    Permissive,
    /// Reject the tag
    Strict,
}

impl ElementKind {
    /// Tag written on the wire
    pub fn wire_tag(&self) -> &'static str {
        match self {
            ElementKind::Int => "INT",
            ElementKind::UInt => "UINT",
            ElementKind::Float => "FLOAT",
            ElementKind::Double => "DOUBLE",
        }
    }

    /// Map a numpy-style dtype name to a kind
    ///
    /// Note that `float64` maps to `Float`; only `double` selects `Double`.
    pub fn from_dtype_name(name: &str) -> Option<Self> {
        match name {
            "int" | "int8" | "int16" | "int32" | "int64" => Some(ElementKind::Int),
            "uint" | "uint8" | "uint16" | "uint32" | "uint64" => Some(ElementKind::UInt),
            "float" | "float32" | "float64" => Some(ElementKind::Float),
            "double" => Some(ElementKind::Double),
            _ => None,
        }
    }

    /// Resolve a wire tag (or dtype name) under the given policy
    pub fn resolve(tag: &str, policy: DtypePolicy) -> Result<Self> {
        let known = match tag {
            "INT" => Some(ElementKind::Int),
            "UINT" => Some(ElementKind::UInt),
            "FLOAT" => Some(ElementKind::Float),
            "DOUBLE" => Some(ElementKind::Double),
            other => ElementKind::from_dtype_name(other),
        };

        match (known, policy) {
            (Some(kind), _) => Ok(kind),
            // Intentional fallback: unknown element types decode as f32
            (None, DtypePolicy::Permissive) => {
                warn!("Unrecognized element type {:?}, treating as FLOAT", tag);
                Ok(ElementKind::Float)
            }
            (None, DtypePolicy::Strict) => Err(GymError::ProtocolError(format!(
                "Unrecognized element type: {}",
                tag
            ))),
        }
    }
}

/// Description of an observation or action space
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceDescriptor {
    /// Discrete choice among `count` values
    Scalar { count: u32 },
    /// N-dimensional numeric array
    Array {
        element: ElementKind,
        low: f64,
        high: f64,
        shape: Vec<u32>,
    },
    /// Ordered subspaces
    Tuple(Vec<SpaceDescriptor>),
    /// Named subspaces, names unique
    Mapping(Vec<(String, SpaceDescriptor)>),
}

impl SpaceDescriptor {
    pub fn scalar(count: u32) -> Self {
        SpaceDescriptor::Scalar { count }
    }

    pub fn array(element: ElementKind, low: f64, high: f64, shape: Vec<u32>) -> Self {
        SpaceDescriptor::Array {
            element,
            low,
            high,
            shape,
        }
    }

    pub fn tuple(elements: Vec<SpaceDescriptor>) -> Self {
        SpaceDescriptor::Tuple(elements)
    }

    /// Build a mapping space, rejecting duplicate names
    pub fn mapping<N: Into<String>>(
        entries: impl IntoIterator<Item = (N, SpaceDescriptor)>,
    ) -> Result<Self> {
        let mut out: Vec<(String, SpaceDescriptor)> = Vec::new();
        for (name, space) in entries {
            let name = name.into();
            if out.iter().any(|(existing, _)| *existing == name) {
                return Err(GymError::SpaceMismatch(format!(
                    "Duplicate mapping entry: {}",
                    name
                )));
            }
            out.push((name, space));
        }
        Ok(SpaceDescriptor::Mapping(out))
    }

    /// Short name of the variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            SpaceDescriptor::Scalar { .. } => "Scalar",
            SpaceDescriptor::Array { .. } => "Array",
            SpaceDescriptor::Tuple(_) => "Tuple",
            SpaceDescriptor::Mapping(_) => "Mapping",
        }
    }

    /// Number of elements of an array space (product of the shape)
    ///
    /// `None` for non-array spaces and for shapes whose product overflows.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            SpaceDescriptor::Array { shape, .. } => shape_product(shape),
            _ => None,
        }
    }

    /// Look up a mapping entry by name
    pub fn entry(&self, name: &str) -> Option<&SpaceDescriptor> {
        match self {
            SpaceDescriptor::Mapping(entries) => entries
                .iter()
                .find(|(entry_name, _)| entry_name == name)
                .map(|(_, space)| space),
            _ => None,
        }
    }

    /// Decode a wire record
    ///
    /// Children are decoded before their parent is assembled.
    pub fn decode(record: &SpaceRecord, policy: DtypePolicy) -> Result<Self> {
        match record {
            SpaceRecord::Discrete { n } => Ok(SpaceDescriptor::Scalar { count: *n }),
            SpaceRecord::Box {
                dtype,
                low,
                high,
                shape,
            } => {
                if shape_product(shape).is_none() {
                    return Err(GymError::ProtocolError(format!(
                        "Box shape {:?} overflows",
                        shape
                    )));
                }
                Ok(SpaceDescriptor::Array {
                    element: ElementKind::resolve(dtype, policy)?,
                    low: *low,
                    high: *high,
                    shape: shape.clone(),
                })
            }
            SpaceRecord::Tuple { elements } => {
                let children = elements
                    .iter()
                    .map(|child| SpaceDescriptor::decode(child, policy))
                    .collect::<Result<Vec<_>>>()?;
                Ok(SpaceDescriptor::Tuple(children))
            }
            SpaceRecord::Dict { elements } => {
                let mut entries: Vec<(String, SpaceDescriptor)> =
                    Vec::with_capacity(elements.len());
                for element in elements {
                    let child = SpaceDescriptor::decode(&element.space, policy)?;
                    if entries.iter().any(|(name, _)| *name == element.name) {
                        return Err(GymError::ProtocolError(format!(
                            "Duplicate Dict space entry: {}",
                            element.name
                        )));
                    }
                    entries.push((element.name.clone(), child));
                }
                Ok(SpaceDescriptor::Mapping(entries))
            }
        }
    }

    /// Encode to a wire record
    pub fn to_record(&self) -> SpaceRecord {
        match self {
            SpaceDescriptor::Scalar { count } => SpaceRecord::Discrete { n: *count },
            SpaceDescriptor::Array {
                element,
                low,
                high,
                shape,
            } => SpaceRecord::Box {
                dtype: element.wire_tag().to_string(),
                low: *low,
                high: *high,
                shape: shape.clone(),
            },
            SpaceDescriptor::Tuple(elements) => SpaceRecord::Tuple {
                elements: elements.iter().map(SpaceDescriptor::to_record).collect(),
            },
            SpaceDescriptor::Mapping(entries) => SpaceRecord::Dict {
                elements: entries
                    .iter()
                    .map(|(name, space)| NamedSpaceRecord {
                        name: name.clone(),
                        space: space.to_record(),
                    })
                    .collect(),
            },
        }
    }
}

fn shape_product(shape: &[u32]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, &dim| count.checked_mul(dim as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_json(json: &str, policy: DtypePolicy) -> Result<SpaceDescriptor> {
        let record: SpaceRecord = serde_json::from_str(json)?;
        SpaceDescriptor::decode(&record, policy)
    }

    #[test]
    fn test_decode_nested_dict() {
        let json = r#"{"Type":"Dict","Elements":[
            {"Name":"thresh","Space":{"Type":"Discrete","N":4}},
            {"Name":"link","Space":{"Type":"Tuple","Elements":[
                {"Type":"Box","Dtype":"INT","Low":0.0,"High":10.0,"Shape":[2,3]},
                {"Type":"Discrete","N":2}
            ]}}
        ]}"#;

        let space = decode_json(json, DtypePolicy::Permissive).unwrap();
        assert_eq!(space.kind_name(), "Mapping");
        assert_eq!(space.entry("thresh"), Some(&SpaceDescriptor::scalar(4)));

        match space.entry("link") {
            Some(SpaceDescriptor::Tuple(children)) => {
                assert_eq!(children.len(), 2);
                assert_eq!(children[0].element_count(), Some(6));
                assert_eq!(
                    children[0],
                    SpaceDescriptor::array(ElementKind::Int, 0.0, 10.0, vec![2, 3])
                );
            }
            other => panic!("Expected tuple entry, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_space_tag_is_fatal() {
        let json = r#"{"Type":"MultiBinary","N":4}"#;
        assert!(serde_json::from_str::<SpaceRecord>(json).is_err());
    }

    #[test]
    fn test_unknown_dtype_falls_back_to_float() {
        let json = r#"{"Type":"Box","Dtype":"COMPLEX","Low":0.0,"High":1.0,"Shape":[1]}"#;

        let space = decode_json(json, DtypePolicy::Permissive).unwrap();
        assert_eq!(
            space,
            SpaceDescriptor::array(ElementKind::Float, 0.0, 1.0, vec![1])
        );

        let err = decode_json(json, DtypePolicy::Strict).unwrap_err();
        assert!(matches!(err, GymError::ProtocolError(_)));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let json = r#"{"Type":"Box","Dtype":"INT","Low":0.0,"High":1.0,
            "Shape":[4294967295,4294967295,4294967295]}"#;
        assert!(matches!(
            decode_json(json, DtypePolicy::Permissive),
            Err(GymError::ProtocolError(_))
        ));

        let built = SpaceDescriptor::array(ElementKind::Int, 0.0, 1.0, vec![u32::MAX; 3]);
        assert_eq!(built.element_count(), None);
    }

    #[test]
    fn test_dtype_names() {
        assert_eq!(ElementKind::from_dtype_name("int16"), Some(ElementKind::Int));
        assert_eq!(ElementKind::from_dtype_name("uint8"), Some(ElementKind::UInt));
        assert_eq!(ElementKind::from_dtype_name("float64"), Some(ElementKind::Float));
        assert_eq!(ElementKind::from_dtype_name("double"), Some(ElementKind::Double));
        assert_eq!(ElementKind::from_dtype_name("bool"), None);
        assert_eq!(
            ElementKind::resolve("uint64", DtypePolicy::Strict).unwrap(),
            ElementKind::UInt
        );
    }

    #[test]
    fn test_duplicate_dict_names_rejected() {
        let json = r#"{"Type":"Dict","Elements":[
            {"Name":"a","Space":{"Type":"Discrete","N":2}},
            {"Name":"a","Space":{"Type":"Discrete","N":3}}
        ]}"#;
        assert!(matches!(
            decode_json(json, DtypePolicy::Permissive),
            Err(GymError::ProtocolError(_))
        ));

        let built = SpaceDescriptor::mapping([
            ("a", SpaceDescriptor::scalar(2)),
            ("a", SpaceDescriptor::scalar(3)),
        ]);
        assert!(matches!(built, Err(GymError::SpaceMismatch(_))));
    }

    #[test]
    fn test_record_roundtrip() {
        let space = SpaceDescriptor::mapping([
            ("thresh", SpaceDescriptor::scalar(4)),
            (
                "cwnd",
                SpaceDescriptor::array(ElementKind::UInt, 0.0, 65535.0, vec![1]),
            ),
        ])
        .unwrap();

        let decoded =
            SpaceDescriptor::decode(&space.to_record(), DtypePolicy::Strict).unwrap();
        assert_eq!(decoded, space);
    }
}
