//! Data containers and their wire codec

use std::collections::BTreeMap;

use crate::error::{GymError, Result};
use crate::space::{DtypePolicy, ElementKind, SpaceDescriptor};
use crate::wire::{BoxRecord, DataRecord, NamedDataRecord};

/// Flat numeric payload of an array value
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl ArrayData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Int(_) => ElementKind::Int,
            ArrayData::UInt(_) => ElementKind::UInt,
            ArrayData::Float(_) => ElementKind::Float,
            ArrayData::Double(_) => ElementKind::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Int(values) => values.len(),
            ArrayData::UInt(values) => values.len(),
            ArrayData::Float(values) => values.len(),
            ArrayData::Double(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values widened to f64, for policies that only deal in floats
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            ArrayData::Int(values) => values.iter().map(|&v| v as f64).collect(),
            ArrayData::UInt(values) => values.iter().map(|&v| v as f64).collect(),
            ArrayData::Float(values) => values.iter().map(|&v| f64::from(v)).collect(),
            ArrayData::Double(values) => values.clone(),
        }
    }
}

/// A value conforming to a [`SpaceDescriptor`]
#[derive(Debug, Clone, PartialEq)]
pub enum DataContainer {
    Scalar(i64),
    Array(ArrayData),
    Tuple(Vec<DataContainer>),
    /// Equality ignores insertion order
    Mapping(BTreeMap<String, DataContainer>),
}

impl DataContainer {
    /// Build a mapping value from `(name, value)` pairs
    pub fn mapping<N: Into<String>>(entries: impl IntoIterator<Item = (N, DataContainer)>) -> Self {
        DataContainer::Mapping(
            entries
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            DataContainer::Scalar(_) => "Scalar",
            DataContainer::Array(_) => "Array",
            DataContainer::Tuple(_) => "Tuple",
            DataContainer::Mapping(_) => "Mapping",
        }
    }

    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            DataContainer::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            DataContainer::Array(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[DataContainer]> {
        match self {
            DataContainer::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataContainer> {
        match self {
            DataContainer::Mapping(entries) => entries.get(name),
            _ => None,
        }
    }

    /// Decode a wire record, checking it against the expected space
    ///
    /// Dispatch follows the record's own tag; any disagreement with `space`
    /// is a protocol error. Arrays come back flat.
    pub fn decode(record: &DataRecord, space: &SpaceDescriptor, policy: DtypePolicy) -> Result<Self> {
        match (record, space) {
            (DataRecord::Discrete { data }, SpaceDescriptor::Scalar { .. }) => {
                Ok(DataContainer::Scalar(*data))
            }
            (DataRecord::Box(boxed), SpaceDescriptor::Array { element, .. }) => {
                let kind = ElementKind::resolve(&boxed.dtype, policy)?;
                if kind != *element {
                    return Err(GymError::ProtocolError(format!(
                        "Box data is {} but space declares {}",
                        kind.wire_tag(),
                        element.wire_tag()
                    )));
                }

                let data = match kind {
                    ElementKind::Int => ArrayData::Int(boxed.int_data.clone()),
                    ElementKind::UInt => ArrayData::UInt(boxed.uint_data.clone()),
                    ElementKind::Float => ArrayData::Float(boxed.float_data.clone()),
                    ElementKind::Double => ArrayData::Double(boxed.double_data.clone()),
                };

                let expected = space.element_count().ok_or_else(|| {
                    GymError::ProtocolError("Box space shape overflows".into())
                })?;
                if data.len() != expected {
                    return Err(GymError::ProtocolError(format!(
                        "Box data has {} values, space shape needs {}",
                        data.len(),
                        expected
                    )));
                }
                Ok(DataContainer::Array(data))
            }
            (DataRecord::Tuple { elements }, SpaceDescriptor::Tuple(spaces)) => {
                if elements.len() != spaces.len() {
                    return Err(GymError::ProtocolError(format!(
                        "Tuple has {} elements, space declares {}",
                        elements.len(),
                        spaces.len()
                    )));
                }
                let children = elements
                    .iter()
                    .zip(spaces)
                    .map(|(child, child_space)| DataContainer::decode(child, child_space, policy))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataContainer::Tuple(children))
            }
            (DataRecord::Dict { elements }, SpaceDescriptor::Mapping(entries)) => {
                let mut values = BTreeMap::new();
                for element in elements {
                    let child_space = space.entry(&element.name).ok_or_else(|| {
                        GymError::ProtocolError(format!(
                            "Dict entry {} is not part of the space",
                            element.name
                        ))
                    })?;
                    let child = DataContainer::decode(&element.value, child_space, policy)?;
                    if values.insert(element.name.clone(), child).is_some() {
                        return Err(GymError::ProtocolError(format!(
                            "Duplicate Dict entry: {}",
                            element.name
                        )));
                    }
                }
                if let Some((missing, _)) = entries.iter().find(|(name, _)| !values.contains_key(name)) {
                    return Err(GymError::ProtocolError(format!(
                        "Dict entry {} is missing",
                        missing
                    )));
                }
                Ok(DataContainer::Mapping(values))
            }
            (record, space) => Err(GymError::ProtocolError(format!(
                "{} data does not match {} space",
                record_type_name(record),
                space.kind_name()
            ))),
        }
    }

    /// Encode for the wire against the target space
    ///
    /// The space picks the element tag for arrays and the child space for
    /// every nested value.
    pub fn encode(&self, space: &SpaceDescriptor) -> Result<DataRecord> {
        match (self, space) {
            (DataContainer::Scalar(value), SpaceDescriptor::Scalar { .. }) => {
                Ok(DataRecord::Discrete { data: *value })
            }
            (DataContainer::Array(data), SpaceDescriptor::Array { element, shape, .. }) => {
                if data.kind() != *element {
                    return Err(GymError::SpaceMismatch(format!(
                        "{:?} values for a {:?} array space",
                        data.kind(),
                        element
                    )));
                }
                let expected = space.element_count().ok_or_else(|| {
                    GymError::SpaceMismatch("Array space shape overflows".into())
                })?;
                if data.len() != expected {
                    return Err(GymError::SpaceMismatch(format!(
                        "{} values for an array space of {} elements",
                        data.len(),
                        expected
                    )));
                }

                let mut boxed = BoxRecord {
                    dtype: element.wire_tag().to_string(),
                    shape: shape.clone(),
                    ..Default::default()
                };
                match data {
                    ArrayData::Int(values) => boxed.int_data = values.clone(),
                    ArrayData::UInt(values) => boxed.uint_data = values.clone(),
                    ArrayData::Float(values) => boxed.float_data = values.clone(),
                    ArrayData::Double(values) => boxed.double_data = values.clone(),
                }
                Ok(DataRecord::Box(boxed))
            }
            (DataContainer::Tuple(values), SpaceDescriptor::Tuple(spaces)) => {
                if values.len() != spaces.len() {
                    return Err(GymError::SpaceMismatch(format!(
                        "{} tuple elements for a space of {}",
                        values.len(),
                        spaces.len()
                    )));
                }
                let elements = values
                    .iter()
                    .zip(spaces)
                    .map(|(value, child_space)| value.encode(child_space))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataRecord::Tuple { elements })
            }
            (DataContainer::Mapping(values), SpaceDescriptor::Mapping(entries)) => {
                if let Some((missing, _)) = entries.iter().find(|(name, _)| !values.contains_key(name)) {
                    return Err(GymError::SpaceMismatch(format!(
                        "Mapping value is missing entry {}",
                        missing
                    )));
                }
                let elements = values
                    .iter()
                    .map(|(name, value)| {
                        let child_space = space.entry(name).ok_or_else(|| {
                            GymError::SpaceMismatch(format!("No space entry named {}", name))
                        })?;
                        Ok(NamedDataRecord {
                            name: name.clone(),
                            value: value.encode(child_space)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataRecord::Dict { elements })
            }
            (value, space) => Err(GymError::SpaceMismatch(format!(
                "{} value for a {} space",
                value.kind_name(),
                space.kind_name()
            ))),
        }
    }
}

fn record_type_name(record: &DataRecord) -> &'static str {
    match record {
        DataRecord::Discrete { .. } => "Discrete",
        DataRecord::Box(_) => "Box",
        DataRecord::Tuple { .. } => "Tuple",
        DataRecord::Dict { .. } => "Dict",
    }
}
