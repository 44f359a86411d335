//! Kernel sources and host-side kernel handles.
//!
//! The native kernel lives in the session's handle table; a `KernelHandle`
//! only names it by key and session generation.

use std::fmt;

use clrt_core::{ClError, DType, Result};

use crate::table::HandleKey;

/// Entry point of generated element-wise kernels.
pub const SIMPLE_ENTRY: &str = "simple_kernel";

/// What to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelSource {
    /// Element-wise kernel computing `result[i] = expr` where each name in
    /// `params` is bound to element `i` of an input buffer of `dtype`.
    Simple {
        expr: String,
        params: Vec<String>,
        dtype: DType,
    },
    /// Caller-provided OpenCL C source and the kernel function to create.
    Program { source: String, entry: String },
}

impl KernelSource {
    pub fn simple(expr: impl Into<String>, params: &[&str], dtype: DType) -> Self {
        KernelSource::Simple {
            expr: expr.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            dtype,
        }
    }

    pub fn program(source: impl Into<String>, entry: impl Into<String>) -> Self {
        KernelSource::Program {
            source: source.into(),
            entry: entry.into(),
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, KernelSource::Simple { .. })
    }

    /// Name of the kernel function to create after the build.
    pub fn entry(&self) -> &str {
        match self {
            KernelSource::Simple { .. } => SIMPLE_ENTRY,
            KernelSource::Program { entry, .. } => entry,
        }
    }

    /// Text shown in handle summaries: the expression for simple kernels,
    /// the full source otherwise.
    pub fn text(&self) -> &str {
        match self {
            KernelSource::Simple { expr, .. } => expr,
            KernelSource::Program { source, .. } => source,
        }
    }

    /// OpenCL C source to hand to the compiler.
    pub fn render(&self) -> Result<String> {
        match self {
            KernelSource::Simple { expr, params, dtype } => simple_source(expr, params, *dtype),
            KernelSource::Program { source, entry } => {
                if entry.is_empty() {
                    return Err(ClError::MissingKeyword("entry".to_string()));
                }
                Ok(source.clone())
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn simple_source(expr: &str, params: &[String], dtype: DType) -> Result<String> {
    if expr.trim().is_empty() {
        return Err(ClError::MissingKeyword("expr".to_string()));
    }
    if let Some(bad) = params
        .iter()
        .find(|p| !is_identifier(p) || matches!(p.as_str(), "result" | "n" | "i"))
    {
        return Err(ClError::Message(format!("invalid kernel parameter name {bad:?}")));
    }

    let ty = dtype.cl_type();
    let mut src = String::new();
    if matches!(dtype, DType::F64 | DType::C64) {
        src.push_str("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n");
    }
    src.push_str(&format!("__kernel void {SIMPLE_ENTRY}(__global {ty} *result"));
    for p in params {
        src.push_str(&format!(", __global const {ty} *{p}_buf"));
    }
    src.push_str(", const unsigned int n) {\n");
    src.push_str("  size_t i = get_global_id(0);\n");
    src.push_str("  if (i >= n) return;\n");
    for p in params {
        src.push_str(&format!("  {ty} {p} = {p}_buf[i];\n"));
    }
    src.push_str(&format!("  result[i] = {expr};\n}}\n"));
    Ok(src)
}

/// Host-side handle to a compiled kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelHandle {
    pub(crate) key: HandleKey,
    pub(crate) generation: u64,
    pub(crate) text: String,
    pub(crate) simple: bool,
    pub(crate) entry: String,
}

impl KernelHandle {
    pub fn key(&self) -> HandleKey {
        self.key
    }

    /// Session generation the kernel was compiled in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Expression (simple kernels) or program source.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }
}

impl fmt::Display for KernelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CL_KERNEL = '{}'", self.text)
    }
}
