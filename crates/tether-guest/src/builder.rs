//! Guest module assembly.
//!
//! [`GuestBuilder`] emits a small module that speaks the bridge ABI:
//!
//! 1. Type section (interned signatures)
//! 2. Import section (harness hooks, `cb_drop`, proxied imports)
//! 3. Function, table, memory and global sections
//! 4. Export section
//! 5. Element section (closure entries in the function table)
//! 6. Code section, custom section
//! 7. Validation with `wasmparser`

use std::borrow::Cow;
use std::collections::HashSet;

use tether_types::abi;
use wasm_encoder::{
    CodeSection, ConstExpr, CustomSection, ElementSection, Elements, EntityType, ExportKind,
    ExportSection, Function, FunctionSection, GlobalSection, GlobalType, ImportSection,
    MemorySection, MemoryType, Module, RefType, TableSection, TableType, TypeSection, ValType,
};

use crate::error::{GuestError, GuestResult};
use crate::runtime;
use crate::types::*;

/// An export that forwards its parameters to an import.
#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub export: String,
    pub module: String,
    pub name: String,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// Builder for bridge-compatible guest modules.
#[derive(Debug, Clone)]
pub struct GuestBuilder {
    intrinsics: String,
    realloc: bool,
    exn_store: bool,
    closures: bool,
    proxies: Vec<Proxy>,
}

impl Default for GuestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestBuilder {
    pub fn new() -> Self {
        Self {
            intrinsics: abi::INTRINSICS.to_string(),
            realloc: true,
            exn_store: false,
            closures: false,
            proxies: Vec::new(),
        }
    }

    /// Namespace used by [`intrinsic`](Self::intrinsic) and `cb_drop`.
    /// Set it before adding intrinsic proxies.
    pub fn intrinsics_namespace(mut self, ns: &str) -> Self {
        self.intrinsics = ns.to_string();
        self
    }

    /// Omit the realloc export so the host takes its malloc-only string path.
    pub fn without_realloc(mut self) -> Self {
        self.realloc = false;
        self
    }

    /// Export an exception store and `exn_last` to read it back.
    pub fn with_exn_store(mut self) -> Self {
        self.exn_store = true;
        self
    }

    /// Add the function table with closure entries reporting to the
    /// `harness` namespace, and the `closure_drop` export.
    pub fn with_closures(mut self) -> Self {
        self.closures = true;
        self
    }

    pub fn proxy(
        mut self,
        export: &str,
        module: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
    ) -> Self {
        self.proxies.push(Proxy {
            export: export.to_string(),
            module: module.to_string(),
            name: name.to_string(),
            params: params.to_vec(),
            results: results.to_vec(),
        });
        self
    }

    /// Proxy an intrinsic under an export of the same shape.
    pub fn intrinsic(
        self,
        export: &str,
        name: &str,
        params: &[ValType],
        results: &[ValType],
    ) -> Self {
        let ns = self.intrinsics.clone();
        self.proxy(export, &ns, name, params, results)
    }

    /// Assemble and validate the module.
    pub fn build(&self) -> GuestResult<Vec<u8>> {
        self.check_proxies()?;
        let mut types = TypeRegistry::default();

        // ── Imports ──────────────────────────────────────────────────────
        let mut imports = ImportSection::new();
        let mut import_count = 0u32;
        let mut hooks = None;
        if self.closures {
            let invoked = types.intern(&[ValType::I32; 3], &[ValType::I32]);
            let destroyed = types.intern(&[ValType::I32; 2], &[]);
            let cb_drop = types.intern(&[ValType::I32], &[ValType::I32]);
            imports.import(HARNESS, HARNESS_INVOKED, EntityType::Function(invoked));
            imports.import(HARNESS, HARNESS_DESTROYED, EntityType::Function(destroyed));
            imports.import(&self.intrinsics, abi::CB_DROP, EntityType::Function(cb_drop));
            hooks = Some(ClosureHooks {
                invoked: 0,
                destroyed: 1,
                cb_drop: 2,
            });
            import_count = 3;
        }
        let proxy_base = import_count;
        for proxy in &self.proxies {
            let ty = types.intern(&proxy.params, &proxy.results);
            imports.import(&proxy.module, &proxy.name, EntityType::Function(ty));
        }
        import_count += self.proxies.len() as u32;

        // ── Functions ────────────────────────────────────────────────────
        let mut funcs = Functions::new(import_count);
        let malloc = funcs.push(
            types.intern(&[ValType::I32], &[ValType::I32]),
            runtime::emit_malloc(),
        );
        let mut exports = vec![
            (abi::EXPORT_MEMORY.to_string(), ExportKind::Memory, 0),
            (abi::EXPORT_MALLOC.to_string(), ExportKind::Func, malloc),
        ];
        if self.realloc {
            let idx = funcs.push(
                types.intern(&[ValType::I32; 3], &[ValType::I32]),
                runtime::emit_realloc(malloc),
            );
            exports.push((abi::EXPORT_REALLOC.to_string(), ExportKind::Func, idx));
        }
        let free = funcs.push(types.intern(&[ValType::I32; 2], &[]), runtime::emit_free());
        exports.push((abi::EXPORT_FREE.to_string(), ExportKind::Func, free));
        if self.exn_store {
            let store = funcs.push(
                types.intern(&[ValType::I32], &[]),
                runtime::emit_exn_store(),
            );
            let last = funcs.push(types.intern(&[], &[ValType::I32]), runtime::emit_exn_last());
            exports.push((abi::EXPORT_EXN_STORE.to_string(), ExportKind::Func, store));
            exports.push((EXPORT_EXN_LAST.to_string(), ExportKind::Func, last));
        }
        let grow = funcs.push(
            types.intern(&[ValType::I32], &[ValType::I32]),
            runtime::emit_grow(),
        );
        exports.push((EXPORT_GROW.to_string(), ExportKind::Func, grow));
        let peek = funcs.push(
            types.intern(&[ValType::I32], &[ValType::I32]),
            runtime::emit_peek_i32(),
        );
        exports.push((EXPORT_PEEK_I32.to_string(), ExportKind::Func, peek));

        let mut table_entries = None;
        if let Some(hooks) = &hooks {
            let invoke = funcs.push(
                types.intern(&[ValType::I32; 3], &[ValType::I32]),
                runtime::emit_closure_invoke(hooks.invoked),
            );
            let dtor = funcs.push(
                types.intern(&[ValType::I32; 2], &[]),
                runtime::emit_closure_dtor(hooks.destroyed),
            );
            let drop = funcs.push(
                types.intern(&[ValType::I32; 3], &[]),
                runtime::emit_closure_drop(hooks.cb_drop, dtor),
            );
            exports.push((EXPORT_CLOSURE_DROP.to_string(), ExportKind::Func, drop));
            exports.push((abi::EXPORT_TABLE.to_string(), ExportKind::Table, 0));
            table_entries = Some([invoke, dtor]);
        }

        for (offset, proxy) in self.proxies.iter().enumerate() {
            let idx = funcs.push(
                types.intern(&proxy.params, &proxy.results),
                runtime::emit_proxy(proxy.params.len() as u32, proxy_base + offset as u32),
            );
            exports.push((proxy.export.clone(), ExportKind::Func, idx));
        }

        check_duplicates(&exports)?;

        // ── Assembly ─────────────────────────────────────────────────────
        let mut module = Module::new();
        module.section(&types.section);
        module.section(&imports);
        module.section(&funcs.declarations);
        if table_entries.is_some() {
            module.section(&emit_table());
        }
        module.section(&emit_memory());
        module.section(&emit_globals());

        let mut export_section = ExportSection::new();
        for (name, kind, idx) in &exports {
            export_section.export(name, *kind, *idx);
        }
        module.section(&export_section);

        if let Some(entries) = &table_entries {
            let mut elements = ElementSection::new();
            elements.active(
                Some(0),
                &ConstExpr::i32_const(INVOKE_SLOT as i32),
                Elements::Functions(Cow::Borrowed(&entries[..])),
            );
            module.section(&elements);
        }

        module.section(&funcs.bodies);
        module.section(&CustomSection {
            name: Cow::Borrowed(CUSTOM_SECTION_NAME),
            data: Cow::Borrowed(GENERATOR_VERSION.as_bytes()),
        });

        let wasm_bytes = module.finish();
        wasmparser::validate(&wasm_bytes)
            .map_err(|e| GuestError::ValidationFailed(format!("{e}")))?;
        Ok(wasm_bytes)
    }

    fn check_proxies(&self) -> GuestResult<()> {
        for proxy in &self.proxies {
            if proxy.results.len() > 1 {
                return Err(GuestError::UnsupportedProxy {
                    export: proxy.export.clone(),
                    reason: format!("{} results; at most one is supported", proxy.results.len()),
                });
            }
            if proxy.export.is_empty() {
                return Err(GuestError::UnsupportedProxy {
                    export: format!("{}::{}", proxy.module, proxy.name),
                    reason: "empty export name".to_string(),
                });
            }
        }
        Ok(())
    }
}

struct ClosureHooks {
    invoked: u32,
    destroyed: u32,
    cb_drop: u32,
}

/// Function and code sections built in lockstep.
struct Functions {
    next: u32,
    declarations: FunctionSection,
    bodies: CodeSection,
}

impl Functions {
    fn new(first: u32) -> Self {
        Self {
            next: first,
            declarations: FunctionSection::new(),
            bodies: CodeSection::new(),
        }
    }

    fn push(&mut self, ty: u32, body: Function) -> u32 {
        self.declarations.function(ty);
        self.bodies.function(&body);
        let idx = self.next;
        self.next += 1;
        idx
    }
}

/// Type section that reuses an index for a repeated signature.
#[derive(Default)]
struct TypeRegistry {
    section: TypeSection,
    seen: Vec<(Vec<ValType>, Vec<ValType>)>,
}

impl TypeRegistry {
    fn intern(&mut self, params: &[ValType], results: &[ValType]) -> u32 {
        if let Some(idx) = self
            .seen
            .iter()
            .position(|(p, r)| p.as_slice() == params && r.as_slice() == results)
        {
            return idx as u32;
        }
        self.section
            .ty()
            .function(params.iter().copied(), results.iter().copied());
        self.seen.push((params.to_vec(), results.to_vec()));
        (self.seen.len() - 1) as u32
    }
}

fn check_duplicates(exports: &[(String, ExportKind, u32)]) -> GuestResult<()> {
    let mut names = HashSet::new();
    for (name, _, _) in exports {
        if !names.insert(name.as_str()) {
            return Err(GuestError::DuplicateExport(name.clone()));
        }
    }
    Ok(())
}

fn emit_table() -> TableSection {
    let mut tables = TableSection::new();
    tables.table(TableType {
        element_type: RefType::FUNCREF,
        table64: false,
        minimum: TABLE_SIZE,
        maximum: Some(TABLE_SIZE),
        shared: false,
    });
    tables
}

fn emit_memory() -> MemorySection {
    let mut memory = MemorySection::new();
    memory.memory(MemoryType {
        minimum: INITIAL_MEMORY_PAGES,
        maximum: Some(MAX_MEMORY_PAGES),
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    memory
}

fn emit_globals() -> GlobalSection {
    let mut globals = GlobalSection::new();

    // GLOBAL_HEAP_PTR
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(HEAP_START as i32),
    );

    // GLOBAL_EXN_SLOT
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(0),
    );

    globals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_registry_reuses_signatures() {
        let mut types = TypeRegistry::default();
        let a = types.intern(&[ValType::I32], &[ValType::I32]);
        let b = types.intern(&[ValType::I32, ValType::I32], &[]);
        let c = types.intern(&[ValType::I32], &[ValType::I32]);
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(types.seen.len(), 2);
    }

    #[test]
    fn duplicate_export_is_rejected() {
        let err = GuestBuilder::new()
            .proxy("grow", "host", "x", &[], &[])
            .build()
            .unwrap_err();
        assert!(matches!(err, GuestError::DuplicateExport(name) if name == "grow"));
    }

    #[test]
    fn multi_value_proxy_is_rejected() {
        let err = GuestBuilder::new()
            .proxy("pair", "host", "pair", &[], &[ValType::I32, ValType::I32])
            .build()
            .unwrap_err();
        assert!(matches!(err, GuestError::UnsupportedProxy { .. }));
    }
}
