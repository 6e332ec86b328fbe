//! Decoded module model.
//!
//! [`Module::decode`] walks the binary sections produced by the external
//! `wasmparser` decoder and converts them into the engine's own owned
//! representation: function signatures, the function index space (host
//! imports resolved against a [`HostRegistry`], contract functions
//! compiled to flat bytecode), global and data-segment initializers, the
//! indirect-call table, and the export map. Everything position-dependent
//! is resolved here so instantiation only evaluates init expressions.

use crate::virtual_machine::compiler::{self, CompiledFunction, SigContext};
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::host::{HostFunction, HostRegistry};
use crate::virtual_machine::value::{Value, ValueType};
use std::sync::Arc;
use wasmparser::{Operator, Parser, Payload};

/// A function signature over the engine's closed value-type set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncSig {
    pub params: Vec<ValueType>,
    /// Zero or one result.
    pub results: Vec<ValueType>,
}

/// One entry of the function index space.
#[derive(Debug)]
pub enum FuncInstance {
    /// Imported host function; never compiled or disassembled.
    Host(Arc<HostFunction>),
    /// Contract function compiled to flat bytecode.
    Compiled(Arc<CompiledFunction>),
}

/// A constant initializer for globals, data offsets, and element offsets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InitExpr {
    Const(Value),
    /// Value of an earlier global.
    GlobalGet(u32),
}

/// A global variable definition.
#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub ty: ValueType,
    pub mutable: bool,
    pub init: InitExpr,
}

/// Declared linear-memory limits, in pages.
#[derive(Clone, Copy, Debug)]
pub struct MemoryLimits {
    pub initial: u64,
    pub maximum: Option<u64>,
}

/// An active data segment copied into memory at instantiation.
#[derive(Clone, Debug)]
pub struct DataSegment {
    pub memory_index: u32,
    pub offset: InitExpr,
    pub data: Vec<u8>,
}

/// An active element segment populating the indirect-call table.
#[derive(Clone, Debug)]
pub struct ElementSegment {
    pub offset: InitExpr,
    /// Function indices; `None` for null entries.
    pub functions: Vec<Option<u32>>,
}

/// Export kinds the engine tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// A named export.
#[derive(Clone, Debug)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// A decoded, compiled module ready for instantiation.
#[derive(Debug)]
pub struct Module {
    pub types: Vec<FuncSig>,
    pub functions: Vec<FuncInstance>,
    /// Type index of each entry in the function index space.
    pub func_sig_indices: Vec<u32>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<Export>,
    pub memories: Vec<MemoryLimits>,
    pub data_segments: Vec<DataSegment>,
    /// Initial size of the indirect-call table.
    pub table_size: u32,
    pub elements: Vec<ElementSegment>,
    pub start: Option<u32>,
}

impl Module {
    /// Decodes a binary module, resolving `env` imports against the given
    /// host registry and compiling every contract function body.
    pub fn decode(bytes: &[u8], resolver: &HostRegistry) -> Result<Module, VmError> {
        let mut module = Module {
            types: Vec::new(),
            functions: Vec::new(),
            func_sig_indices: Vec::new(),
            globals: Vec::new(),
            exports: Vec::new(),
            memories: Vec::new(),
            data_segments: Vec::new(),
            table_size: 0,
            elements: Vec::new(),
            start: None,
        };
        let mut num_imported = 0usize;
        let mut code_entries_seen = 0usize;

        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload.map_err(|e| VmError::Decode(e.to_string()))?;
            match payload {
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        let ty = ty.map_err(|e| VmError::Decode(e.to_string()))?;
                        module.types.push(convert_sig(&ty)?);
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(|e| VmError::Decode(e.to_string()))?;
                        let (host, sig_index) = resolve_import(
                            resolver,
                            import.module,
                            import.name,
                            &import.ty,
                            &module.types,
                        )?;
                        module.func_sig_indices.push(sig_index);
                        module.functions.push(FuncInstance::Host(host));
                        num_imported += 1;
                    }
                }
                Payload::FunctionSection(reader) => {
                    for type_index in reader {
                        let type_index = type_index.map_err(|e| VmError::Decode(e.to_string()))?;
                        if type_index as usize >= module.types.len() {
                            return Err(VmError::Decode(format!(
                                "function type index {} out of range",
                                type_index
                            )));
                        }
                        module.func_sig_indices.push(type_index);
                    }
                }
                Payload::TableSection(reader) => {
                    for table in reader {
                        let table = table.map_err(|e| VmError::Decode(e.to_string()))?;
                        if module.table_size != 0 {
                            return Err(VmError::Decode(
                                "more than one table in module".to_string(),
                            ));
                        }
                        module.table_size = table.ty.initial as u32;
                    }
                }
                Payload::MemorySection(reader) => {
                    for memory in reader {
                        let memory = memory.map_err(|e| VmError::Decode(e.to_string()))?;
                        module.memories.push(MemoryLimits {
                            initial: memory.initial,
                            maximum: memory.maximum,
                        });
                    }
                }
                Payload::GlobalSection(reader) => {
                    for global in reader {
                        let global = global.map_err(|e| VmError::Decode(e.to_string()))?;
                        module.globals.push(GlobalDef {
                            ty: ValueType::from_decoder(global.ty.content_type)?,
                            mutable: global.ty.mutable,
                            init: decode_init_expr(&global.init_expr)?,
                        });
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.map_err(|e| VmError::Decode(e.to_string()))?;
                        let kind = match export.kind {
                            wasmparser::ExternalKind::Func => ExportKind::Func,
                            wasmparser::ExternalKind::Table => ExportKind::Table,
                            wasmparser::ExternalKind::Memory => ExportKind::Memory,
                            wasmparser::ExternalKind::Global => ExportKind::Global,
                            _ => continue,
                        };
                        module.exports.push(Export {
                            name: export.name.to_string(),
                            kind,
                            index: export.index,
                        });
                    }
                }
                Payload::StartSection { func, .. } => {
                    module.start = Some(func);
                }
                Payload::ElementSection(reader) => {
                    for element in reader {
                        let element = element.map_err(|e| VmError::Decode(e.to_string()))?;
                        module.elements.push(decode_element(element)?);
                    }
                }
                Payload::DataSection(reader) => {
                    for data in reader {
                        let data = data.map_err(|e| VmError::Decode(e.to_string()))?;
                        match data.kind {
                            wasmparser::DataKind::Active {
                                memory_index,
                                offset_expr,
                            } => {
                                module.data_segments.push(DataSegment {
                                    memory_index,
                                    offset: decode_init_expr(&offset_expr)?,
                                    data: data.data.to_vec(),
                                });
                            }
                            wasmparser::DataKind::Passive => {
                                return Err(VmError::Decode(
                                    "passive data segments are not supported".to_string(),
                                ));
                            }
                        }
                    }
                }
                Payload::CodeSectionEntry(body) => {
                    let func_index = num_imported + code_entries_seen;
                    let sig_index = *module.func_sig_indices.get(func_index).ok_or_else(|| {
                        VmError::Decode("code entry without function declaration".to_string())
                    })?;
                    let ctx = SigContext {
                        types: &module.types,
                        func_sigs: &module.func_sig_indices,
                    };
                    let compiled = compiler::compile(&body, sig_index, &ctx)?;
                    module.functions.push(FuncInstance::Compiled(Arc::new(compiled)));
                    code_entries_seen += 1;
                }
                _ => {}
            }
        }

        if module.functions.len() != module.func_sig_indices.len() {
            return Err(VmError::Decode(
                "function and code section lengths disagree".to_string(),
            ));
        }

        Ok(module)
    }

    /// Returns the signature of a function in the index space.
    pub fn func_sig(&self, index: u32) -> Option<&FuncSig> {
        let sig_index = *self.func_sig_indices.get(index as usize)?;
        self.types.get(sig_index as usize)
    }

    /// Looks up an exported function index by name.
    pub fn export_func(&self, name: &str) -> Option<u32> {
        self.exports
            .iter()
            .find(|e| e.kind == ExportKind::Func && e.name == name)
            .map(|e| e.index)
    }
}

/// Converts a decoder function type, rejecting multi-value results and
/// non-numeric types.
fn convert_sig(ty: &wasmparser::FuncType) -> Result<FuncSig, VmError> {
    if ty.results().len() > 1 {
        return Err(VmError::Decode(
            "multi-value results are not supported".to_string(),
        ));
    }
    let params = ty
        .params()
        .iter()
        .map(|p| ValueType::from_decoder(*p))
        .collect::<Result<Vec<_>, _>>()?;
    let results = ty
        .results()
        .iter()
        .map(|r| ValueType::from_decoder(*r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FuncSig { params, results })
}

/// Resolves one import against the host registry, returning the host
/// function and the module-declared type index.
///
/// Only function imports from the host namespace are accepted, and the
/// module-declared signature must match the registered one.
fn resolve_import(
    resolver: &HostRegistry,
    module: &str,
    name: &str,
    ty: &wasmparser::TypeRef,
    types: &[FuncSig],
) -> Result<(Arc<HostFunction>, u32), VmError> {
    let unknown = || VmError::UnknownImport {
        module: module.to_string(),
        name: name.to_string(),
    };

    let type_index = match ty {
        wasmparser::TypeRef::Func(type_index) => *type_index,
        _ => return Err(unknown()),
    };
    if module != resolver.namespace() {
        return Err(unknown());
    }
    let host = resolver.resolve(name).ok_or_else(unknown)?;

    let declared = types
        .get(type_index as usize)
        .ok_or_else(|| VmError::Decode(format!("import type index {} out of range", type_index)))?;
    if *declared != host.sig {
        return Err(VmError::Decode(format!(
            "import {}.{} signature mismatch",
            module, name
        )));
    }
    Ok((host, type_index))
}

/// Decodes a single-instruction constant expression.
fn decode_init_expr(expr: &wasmparser::ConstExpr) -> Result<InitExpr, VmError> {
    let mut reader = expr.get_operators_reader();
    let op = reader.read().map_err(|_| VmError::InvalidInitExpr)?;
    let init = match op {
        Operator::I32Const { value } => InitExpr::Const(Value::I32(value)),
        Operator::I64Const { value } => InitExpr::Const(Value::I64(value)),
        Operator::F32Const { value } => InitExpr::Const(Value::F32(f32::from_bits(value.bits()))),
        Operator::F64Const { value } => InitExpr::Const(Value::F64(f64::from_bits(value.bits()))),
        Operator::GlobalGet { global_index } => InitExpr::GlobalGet(global_index),
        _ => return Err(VmError::InvalidInitExpr),
    };
    match reader.read() {
        Ok(Operator::End) => Ok(init),
        _ => Err(VmError::InvalidInitExpr),
    }
}

/// Decodes an active element segment into table entries.
fn decode_element(element: wasmparser::Element<'_>) -> Result<ElementSegment, VmError> {
    let offset = match element.kind {
        wasmparser::ElementKind::Active {
            table_index,
            offset_expr,
        } => {
            if table_index.unwrap_or(0) != 0 {
                return Err(VmError::Decode(
                    "element segment targets a non-zero table".to_string(),
                ));
            }
            decode_init_expr(&offset_expr)?
        }
        _ => {
            return Err(VmError::Decode(
                "passive element segments are not supported".to_string(),
            ));
        }
    };

    let mut functions = Vec::new();
    match element.items {
        wasmparser::ElementItems::Functions(reader) => {
            for index in reader {
                let index = index.map_err(|e| VmError::Decode(e.to_string()))?;
                functions.push(Some(index));
            }
        }
        wasmparser::ElementItems::Expressions(_, reader) => {
            for expr in reader {
                let expr = expr.map_err(|e| VmError::Decode(e.to_string()))?;
                let mut ops = expr.get_operators_reader();
                match ops.read().map_err(|_| VmError::InvalidInitExpr)? {
                    Operator::RefFunc { function_index } => functions.push(Some(function_index)),
                    Operator::RefNull { .. } => functions.push(None),
                    _ => return Err(VmError::InvalidInitExpr),
                }
            }
        }
    }

    Ok(ElementSegment { offset, functions })
}
