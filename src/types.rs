use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// The fixed set of data types the compiler recognizes on pins and values.
///
/// The set is closed on purpose: the execution engine only knows how to bind
/// these shapes. Everything else must be expressed through per-element
/// buffers of these types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    Uint,
    Float,
    Half,
    Vec2,
    Vec3,
    Vec4,
}

/// Shader-facing description of one recognized data type.
#[derive(Clone, Debug)]
pub struct DataTypeInfo {
    pub data_type: DataType,
    pub wgsl_name: &'static str,
    /// Size of the encoded shader value in bytes.
    pub shader_size: usize,
    pub shader_align: usize,
}

/// Registry of the data types a compile pass accepts.
///
/// Carried by [`crate::compiler::CompilerConfig`] so that type recognition is
/// an explicit input to the compile entry point rather than process-wide
/// state. The default registry contains every [`DataType`]; a restricted
/// registry turns unrecognized pin/value types into structural diagnostics.
#[derive(Clone, Debug)]
pub struct DataTypeRegistry {
    entries: Vec<DataTypeInfo>,
}

impl Default for DataTypeRegistry {
    fn default() -> Self {
        Self::with_types(&[
            DataType::Bool,
            DataType::Int,
            DataType::Uint,
            DataType::Float,
            DataType::Half,
            DataType::Vec2,
            DataType::Vec3,
            DataType::Vec4,
        ])
    }
}

impl DataTypeRegistry {
    pub fn with_types(types: &[DataType]) -> Self {
        let entries = types.iter().map(|ty| type_info(*ty)).collect();
        Self { entries }
    }

    pub fn info(&self, ty: DataType) -> Option<&DataTypeInfo> {
        self.entries.iter().find(|e| e.data_type == ty)
    }

    pub fn is_registered(&self, ty: DataType) -> bool {
        self.info(ty).is_some()
    }

    pub fn wgsl_name(&self, ty: DataType) -> Result<&'static str> {
        self.info(ty)
            .map(|e| e.wgsl_name)
            .ok_or_else(|| anyhow!("data type {ty:?} is not registered"))
    }
}

fn type_info(ty: DataType) -> DataTypeInfo {
    let (wgsl_name, shader_size, shader_align) = match ty {
        // bool is encoded as u32 on the host side; WGSL bool is not
        // host-shareable.
        DataType::Bool => ("bool", 4, 4),
        DataType::Int => ("i32", 4, 4),
        DataType::Uint => ("u32", 4, 4),
        DataType::Float => ("f32", 4, 4),
        DataType::Half => ("f16", 2, 2),
        DataType::Vec2 => ("vec2<f32>", 8, 8),
        DataType::Vec3 => ("vec3<f32>", 12, 16),
        DataType::Vec4 => ("vec4<f32>", 16, 16),
    };
    DataTypeInfo {
        data_type: ty,
        wgsl_name,
        shader_size,
        shader_align,
    }
}

/// A literal value carried by a constant or variable node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Half(half::f16),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::Int(_) => DataType::Int,
            Value::Uint(_) => DataType::Uint,
            Value::Float(_) => DataType::Float,
            Value::Half(_) => DataType::Half,
            Value::Vec2(_) => DataType::Vec2,
            Value::Vec3(_) => DataType::Vec3,
            Value::Vec4(_) => DataType::Vec4,
        }
    }

    /// Encode the value the way the execution engine uploads it to the GPU.
    pub fn shader_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bool(b) => bytemuck::bytes_of(&(*b as u32)).to_vec(),
            Value::Int(v) => bytemuck::bytes_of(v).to_vec(),
            Value::Uint(v) => bytemuck::bytes_of(v).to_vec(),
            Value::Float(v) => bytemuck::bytes_of(v).to_vec(),
            Value::Half(v) => v.to_le_bytes().to_vec(),
            Value::Vec2(v) => bytemuck::cast_slice(&v[..]).to_vec(),
            Value::Vec3(v) => bytemuck::cast_slice(&v[..]).to_vec(),
            Value::Vec4(v) => bytemuck::cast_slice(&v[..]).to_vec(),
        }
    }
}

/// Scheduling bucket a node graph (and each compiled kernel) belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    /// Runs once, before the first update.
    Setup,
    /// Runs every execution.
    Update,
    /// Runs on demand, by name.
    Trigger,
    /// Reusable graph invoked through reference nodes; never compiled
    /// directly.
    Function,
    /// Nested graph owned by a reference node; never compiled directly.
    Subgraph,
}

impl GraphType {
    pub fn is_compiled(self) -> bool {
        matches!(self, GraphType::Setup | GraphType::Update | GraphType::Trigger)
    }
}

/// Which side(s) of the host/device boundary consume a value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValueUsage {
    pub host: bool,
    pub device: bool,
}

impl ValueUsage {
    pub const HOST: ValueUsage = ValueUsage {
        host: true,
        device: false,
    };
    pub const DEVICE: ValueUsage = ValueUsage {
        host: false,
        device: true,
    };

    pub fn is_empty(self) -> bool {
        !self.host && !self.device
    }

    pub fn union(self, other: ValueUsage) -> ValueUsage {
        ValueUsage {
            host: self.host || other.host,
            device: self.device || other.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_bytes_match_registry_sizes() {
        let registry = DataTypeRegistry::default();
        let values = [
            Value::Bool(true),
            Value::Int(-3),
            Value::Uint(7),
            Value::Float(1.5),
            Value::Half(half::f16::from_f32(0.25)),
            Value::Vec2([1.0, 2.0]),
            Value::Vec3([1.0, 2.0, 3.0]),
            Value::Vec4([1.0, 2.0, 3.0, 4.0]),
        ];
        for value in values {
            let info = registry.info(value.data_type()).expect("registered");
            assert_eq!(value.shader_bytes().len(), info.shader_size);
        }
    }

    #[test]
    fn restricted_registry_rejects_unlisted_types() {
        let registry = DataTypeRegistry::with_types(&[DataType::Float]);
        assert!(registry.is_registered(DataType::Float));
        assert!(!registry.is_registered(DataType::Half));
        assert!(registry.wgsl_name(DataType::Half).is_err());
    }

    #[test]
    fn usage_union() {
        let u = ValueUsage::HOST.union(ValueUsage::DEVICE);
        assert!(u.host && u.device);
        assert!(ValueUsage::default().is_empty());
    }
}
