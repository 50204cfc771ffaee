//! Compiled-kernel object.
//!
//! Wraps one IR [`Module`] plus the kernel-function records the host (the
//! sampler graph, in practice) needs to bind arguments and pick an entry
//! point. A [`CompiledKernel`] is either *invalid* (never compiled, or the
//! last compile failed) or *valid* with a fresh module.

use crate::diagnostics::DiagnosticLog;
use crate::frontend::lower_translation_unit;
use crate::ir::Module;
use crate::parser;
use crate::proto::KernelTarget;
use crate::types::Type;

/// The externally visible parameter set of one kernel function, keyed by
/// position.
#[derive(Debug, Clone)]
pub struct KernelArgumentSpec {
    pub name: String,
    pub ty: Type,
}

impl KernelArgumentSpec {
    pub fn is_static(&self) -> bool {
        self.ty.is_static()
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self.ty.specifier, crate::types::Specifier::Sampler)
    }
}

#[derive(Debug, Clone)]
pub struct KernelFunctionRecord {
    pub name: String,
    pub return_type: Type,
    pub target: KernelTarget,
    pub args: Vec<KernelArgumentSpec>,
}

/// Result of [`CompiledKernel::compile`]: a pass/fail flag plus the full
/// diagnostic log, "compile result is a boolean success plus the log".
#[derive(Debug, Clone)]
pub struct CompileLog {
    pub log: DiagnosticLog,
}

impl CompileLog {
    pub fn success(&self) -> bool {
        !self.log.has_errors()
    }

    /// Internal-invariant violations, kept apart from ordinary user errors.
    pub fn internal_errors(&self) -> impl Iterator<Item = &crate::diagnostics::Diagnostic> {
        self.log
            .diagnostics
            .iter()
            .filter(|d| matches!(d.severity, crate::diagnostics::Severity::Internal))
    }
}

#[derive(Debug, Default)]
pub struct CompiledKernel {
    module: Option<Module>,
    kernels: Vec<KernelFunctionRecord>,
}

impl CompiledKernel {
    pub fn new() -> CompiledKernel {
        CompiledKernel::default()
    }

    /// Compile `source`, replacing any previously compiled module wholesale
    /// on success. A failed compile invalidates the kernel: `is_valid`
    /// becomes `false` and any previously compiled module is dropped,
    /// matching invalid/valid module invariant (there is no "stale but
    /// valid" state).
    pub fn compile(&mut self, source: &str) -> CompileLog {
        let mut log = DiagnosticLog::default();
        let tu = parser::parse(source, &mut log);
        let module = lower_translation_unit(&tu, &mut log);

        if log.has_errors() {
            self.module = None;
            self.kernels.clear();
            return CompileLog { log };
        }

        self.kernels = module
            .functions
            .iter()
            .filter(|f| f.external_linkage)
            .filter_map(|f| {
                f.kernel_target.map(|target| KernelFunctionRecord {
                    name: f.name.clone(),
                    return_type: f.return_type,
                    target,
                    args: f
                        .params
                        .iter()
                        .map(|p| KernelArgumentSpec {
                            name: p.name.clone(),
                            ty: p.ty,
                        })
                        .collect(),
                })
            })
            .collect();
        self.module = Some(module);
        CompileLog { log }
    }

    pub fn is_valid(&self) -> bool {
        self.module.is_some()
    }

    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    pub fn kernels(&self) -> &[KernelFunctionRecord] {
        &self.kernels
    }

    pub fn kernel(&self, name: &str) -> Option<&KernelFunctionRecord> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Explicit module invalidation ( "(iii) explicit module invalidation"),
    /// e.g. when a host decides a dependency went away.
    pub fn invalidate(&mut self) {
        self.module = None;
        self.kernels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_compile_lists_kernel_records() {
        let mut ck = CompiledKernel::new();
        let log = ck.compile("kernel vec4 id(sampler src) { return sample(src, samplerCoord(src)); }");
        assert!(log.success());
        assert!(ck.is_valid());
        assert_eq!(ck.kernels().len(), 1);
        assert_eq!(ck.kernels()[0].name, "id");
        assert_eq!(ck.kernels()[0].args.len(), 1);
    }

    #[test]
    fn failed_compile_invalidates_and_reports_errors() {
        let mut ck = CompiledKernel::new();
        let log = ck.compile("kernel vec4 bad() { return undefined_symbol; }");
        assert!(!log.success());
        assert!(!ck.is_valid());
        assert!(ck.kernels().is_empty());
    }

    #[test]
    fn a_second_successful_compile_replaces_the_first_wholesale() {
        let mut ck = CompiledKernel::new();
        ck.compile("kernel vec4 a() { return vec4(0.0, 0.0, 0.0, 1.0); }");
        assert_eq!(ck.kernels()[0].name, "a");
        ck.compile("kernel vec4 b() { return vec4(1.0, 1.0, 1.0, 1.0); }");
        assert_eq!(ck.kernels().len(), 1);
        assert_eq!(ck.kernels()[0].name, "b");
    }
}
