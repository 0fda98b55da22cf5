//! IR type system
//!
//! Types are structural and interned: registering the same shape twice
//! returns the same [`TypeId`]. Ids are cheap copyable handles that the
//! rest of the IR stores instead of nested type trees.

use rustc_hash::FxHashMap as HashMap;

/// Handle to an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

/// Scalar kinds
///
/// The 8-bit integer kinds only occur as subgroup matrix component types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I32,
    U32,
    F16,
    F32,
}

impl ScalarKind {
    /// Check if this is an integer kind (of any width)
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::I8 | ScalarKind::U8 | ScalarKind::I32 | ScalarKind::U32
        )
    }

    /// Check if this is a signed integer kind
    pub fn is_signed_integer(self) -> bool {
        matches!(self, ScalarKind::I8 | ScalarKind::I32)
    }

    /// Check if this is an unsigned integer kind
    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, ScalarKind::U8 | ScalarKind::U32)
    }
}

/// Address spaces for pointers and variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    Immediate,
    Handle,
    In,
    Out,
}

/// Element count of an array type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayCount {
    /// Length known at compile time
    Fixed(u32),
    /// Length only known at runtime, queried via `arrayLength`
    Runtime,
}

/// Texture dimensionality, including arrayed variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDim {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

impl TextureDim {
    /// Check if textures of this dimensionality carry an array index
    pub fn is_arrayed(self) -> bool {
        matches!(self, TextureDim::D2Array | TextureDim::CubeArray)
    }
}

/// Texture class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureClass {
    Sampled,
    Depth,
    Storage,
}

impl TextureClass {
    /// Check if textures of this class have a mip chain
    pub fn has_mip_levels(self) -> bool {
        matches!(self, TextureClass::Sampled | TextureClass::Depth)
    }
}

/// A structural IR type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarKind),
    Vector { elem: TypeId, width: u32 },
    Matrix { columns: u32, rows: u32, elem: TypeId },
    Array { elem: TypeId, count: ArrayCount },
    Struct { members: Vec<TypeId> },
    Pointer { space: AddressSpace, store: TypeId },
    Texture { dim: TextureDim, class: TextureClass },
    SubgroupMatrix { rows: u32, columns: u32, elem: TypeId },
}

/// Interning store for IR types
#[derive(Debug, Default)]
pub struct TypeStore {
    types: Vec<Type>,
    lookup: HashMap<Type, TypeId>,
}

impl TypeStore {
    /// Create an empty type store
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type, returning the id of the existing entry if the same
    /// shape was registered before
    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.lookup.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.lookup.insert(ty, id);
        id
    }

    /// Get the type for an id
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn bool(&mut self) -> TypeId {
        self.intern(Type::Scalar(ScalarKind::Bool))
    }

    pub fn i32(&mut self) -> TypeId {
        self.intern(Type::Scalar(ScalarKind::I32))
    }

    pub fn u32(&mut self) -> TypeId {
        self.intern(Type::Scalar(ScalarKind::U32))
    }

    pub fn f32(&mut self) -> TypeId {
        self.intern(Type::Scalar(ScalarKind::F32))
    }

    pub fn scalar(&mut self, kind: ScalarKind) -> TypeId {
        self.intern(Type::Scalar(kind))
    }

    pub fn vec(&mut self, elem: TypeId, width: u32) -> TypeId {
        self.intern(Type::Vector { elem, width })
    }

    pub fn matrix(&mut self, columns: u32, rows: u32, elem: TypeId) -> TypeId {
        self.intern(Type::Matrix {
            columns,
            rows,
            elem,
        })
    }

    pub fn array(&mut self, elem: TypeId, len: u32) -> TypeId {
        self.intern(Type::Array {
            elem,
            count: ArrayCount::Fixed(len),
        })
    }

    pub fn runtime_array(&mut self, elem: TypeId) -> TypeId {
        self.intern(Type::Array {
            elem,
            count: ArrayCount::Runtime,
        })
    }

    pub fn structure(&mut self, members: Vec<TypeId>) -> TypeId {
        self.intern(Type::Struct { members })
    }

    pub fn ptr(&mut self, space: AddressSpace, store: TypeId) -> TypeId {
        self.intern(Type::Pointer { space, store })
    }

    pub fn texture(&mut self, dim: TextureDim, class: TextureClass) -> TypeId {
        self.intern(Type::Texture { dim, class })
    }

    pub fn subgroup_matrix(&mut self, rows: u32, columns: u32, elem: TypeId) -> TypeId {
        self.intern(Type::SubgroupMatrix {
            rows,
            columns,
            elem,
        })
    }

    /// The scalar kind of a scalar type, or of a vector's element type
    pub fn scalar_kind(&self, id: TypeId) -> Option<ScalarKind> {
        match self.get(id) {
            Type::Scalar(kind) => Some(*kind),
            Type::Vector { elem, .. } => self.scalar_kind(*elem),
            _ => None,
        }
    }

    /// Check if a type is an integer scalar
    pub fn is_integer_scalar(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Scalar(kind) if kind.is_integer())
    }

    /// Check if a type is a signed integer scalar
    pub fn is_signed_integer_scalar(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Scalar(kind) if kind.is_signed_integer())
    }

    /// Check if a type is an unsigned integer scalar
    pub fn is_unsigned_integer_scalar(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Scalar(kind) if kind.is_unsigned_integer())
    }

    /// Check if a type is an integer scalar or a vector of integer scalars
    pub fn is_integer_scalar_or_vector(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Scalar(kind) => kind.is_integer(),
            Type::Vector { elem, .. } => self.is_integer_scalar(*elem),
            _ => false,
        }
    }

    /// Check if a type is an unsigned integer scalar or vector thereof
    pub fn is_unsigned_integer_scalar_or_vector(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Scalar(kind) => kind.is_unsigned_integer(),
            Type::Vector { elem, .. } => self.is_unsigned_integer_scalar(*elem),
            _ => false,
        }
    }

    /// The width of a vector type
    pub fn vector_width(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Vector { width, .. } => Some(*width),
            _ => None,
        }
    }

    /// Strip one level of pointer indirection, if present
    pub fn unwrap_ptr(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Type::Pointer { store, .. } => *store,
            _ => id,
        }
    }

    /// The address space of a pointer type
    pub fn pointer_space(&self, id: TypeId) -> Option<AddressSpace> {
        match self.get(id) {
            Type::Pointer { space, .. } => Some(*space),
            _ => None,
        }
    }

    /// The type produced by indexing one step into a composite.
    ///
    /// `index` is needed only for structs, whose members are heterogeneous;
    /// for the homogeneous composites it is ignored.
    pub fn element(&mut self, id: TypeId, index: Option<u32>) -> Option<TypeId> {
        match self.get(id).clone() {
            Type::Vector { elem, .. } => Some(elem),
            Type::Matrix { rows, elem, .. } => Some(self.vec(elem, rows)),
            Type::Array { elem, .. } => Some(elem),
            Type::Struct { members } => {
                let index = index? as usize;
                members.get(index).copied()
            }
            _ => None,
        }
    }

    /// Construct `scalar` widened to the shape of `like`: the scalar itself
    /// when `like` is a scalar, a vector of the same width when it is a
    /// vector
    pub fn match_width(&mut self, scalar: TypeId, like: TypeId) -> TypeId {
        match self.get(like) {
            Type::Vector { width, .. } => {
                let width = *width;
                self.vec(scalar, width)
            }
            _ => scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedups() {
        let mut ts = TypeStore::new();
        let a = ts.u32();
        let b = ts.u32();
        assert_eq!(a, b);

        let v1 = ts.vec(a, 3);
        let v2 = ts.vec(b, 3);
        assert_eq!(v1, v2);
        assert_ne!(v1, a);
    }

    #[test]
    fn test_scalar_queries() {
        let mut ts = TypeStore::new();
        let i32_ty = ts.i32();
        let u32_ty = ts.u32();
        let f32_ty = ts.f32();

        assert!(ts.is_integer_scalar(i32_ty));
        assert!(ts.is_signed_integer_scalar(i32_ty));
        assert!(!ts.is_unsigned_integer_scalar(i32_ty));
        assert!(ts.is_unsigned_integer_scalar(u32_ty));
        assert!(!ts.is_integer_scalar(f32_ty));

        let vec3u = ts.vec(u32_ty, 3);
        assert!(ts.is_integer_scalar_or_vector(vec3u));
        assert!(ts.is_unsigned_integer_scalar_or_vector(vec3u));
        assert!(!ts.is_integer_scalar(vec3u));
    }

    #[test]
    fn test_element_walk() {
        let mut ts = TypeStore::new();
        let u32_ty = ts.u32();
        let vec4 = ts.vec(u32_ty, 4);
        let arr = ts.array(vec4, 8);

        assert_eq!(ts.element(arr, None), Some(vec4));
        assert_eq!(ts.element(vec4, None), Some(u32_ty));
        assert_eq!(ts.element(u32_ty, None), None);

        let st = ts.structure(vec![u32_ty, arr]);
        assert_eq!(ts.element(st, Some(1)), Some(arr));
        assert_eq!(ts.element(st, Some(2)), None);
        assert_eq!(ts.element(st, None), None);
    }

    #[test]
    fn test_match_width() {
        let mut ts = TypeStore::new();
        let u32_ty = ts.u32();
        let i32_ty = ts.i32();
        let vec2i = ts.vec(i32_ty, 2);

        assert_eq!(ts.match_width(u32_ty, i32_ty), u32_ty);
        let vec2u = ts.vec(u32_ty, 2);
        assert_eq!(ts.match_width(u32_ty, vec2i), vec2u);
    }

    #[test]
    fn test_unwrap_ptr() {
        let mut ts = TypeStore::new();
        let u32_ty = ts.u32();
        let arr = ts.runtime_array(u32_ty);
        let ptr = ts.ptr(AddressSpace::Storage, arr);

        assert_eq!(ts.unwrap_ptr(ptr), arr);
        assert_eq!(ts.unwrap_ptr(arr), arr);
        assert_eq!(ts.pointer_space(ptr), Some(AddressSpace::Storage));
    }
}
