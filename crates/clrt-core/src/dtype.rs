use std::fmt;

/// Element types a device buffer can hold.
///
/// Each variant maps onto an OpenCL C scalar or vector type, so generated
/// kernel source can be typed directly from a buffer's dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 8-bit unsigned integer (`uchar`)
    U8,
    /// 16-bit signed integer (`short`)
    I16,
    /// 16-bit unsigned integer (`ushort`)
    U16,
    /// 32-bit signed integer (`int`)
    I32,
    /// 32-bit unsigned integer (`uint`)
    U32,
    /// 64-bit signed integer (`long`)
    I64,
    /// 64-bit unsigned integer (`ulong`)
    U64,
    /// 32-bit IEEE 754 single-precision float (`float`)
    F32,
    /// 64-bit IEEE 754 double-precision float (`double`)
    F64,
    /// Complex single precision, stored as (re, im) pairs (`float2`)
    C32,
    /// Complex double precision, stored as (re, im) pairs (`double2`)
    C64,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 | DType::C32 => 8,
            DType::C64 => 16,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype, or `None`
    /// if that overflows `usize`.
    pub fn storage_bytes(&self, n: usize) -> Option<usize> {
        self.element_size().checked_mul(n)
    }

    /// OpenCL C spelling of the element type.
    pub fn cl_type(&self) -> &'static str {
        match self {
            DType::U8 => "uchar",
            DType::I16 => "short",
            DType::U16 => "ushort",
            DType::I32 => "int",
            DType::U32 => "uint",
            DType::I64 => "long",
            DType::U64 => "ulong",
            DType::F32 => "float",
            DType::F64 => "double",
            DType::C32 => "float2",
            DType::C64 => "double2",
        }
    }

    /// Upper-case type label used in handle summaries (`CL_FLOAT`).
    pub fn label(&self) -> &'static str {
        match self {
            DType::U8 => "UCHAR",
            DType::I16 => "SHORT",
            DType::U16 => "USHORT",
            DType::I32 => "INT",
            DType::U32 => "UINT",
            DType::I64 => "LONG",
            DType::U64 => "ULONG",
            DType::F32 => "FLOAT",
            DType::F64 => "DOUBLE",
            DType::C32 => "FLOAT2",
            DType::C64 => "DOUBLE2",
        }
    }

}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::U16 => "u16",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::C32 => "c32",
            DType::C64 => "c64",
        };
        write!(f, "{name}")
    }
}

/// Host element types that can be copied to and from a device buffer.
pub trait Element: bytemuck::Pod {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element!(
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    [f32; 2] => C32,
    [f64; 2] => C64,
);
