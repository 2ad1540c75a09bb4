//! Turns compiled code into an nmethod or runtime stub in the code cache.
//!
//! Installation runs in two phases. [`CodeInstaller::prepare`] checks the compiled code, records
//! its dependencies, fills the code buffer and processes every site, all without touching the code
//! cache. [`CodeInstaller::install`] then registers the result with the VM and binds the
//! installed code mirror.

use std::time::Instant;

use super::buffer::{CodeBuffer, Patch, RelocKind, Section, INSTS_ALIGNMENT};
use super::compiled_code::{
    Assumption, CallTarget, CompiledCode, CompiledCodeKind, DebugInfo, InfopointReason, Reference, SiteKind,
};
use super::debug_info::{DebugInformationRecorder, ScopeMode, ScopeTranslator};
use super::dependencies::Dependencies;
use super::exception_tables::{ExceptionHandlerTable, ImplicitExceptionTable};
use super::offsets::{CodeOffset, CodeOffsets, MarkId};
use super::oop_map::{OopMap, OopMapSet};
use super::platform::{self, Relocator};
use crate::env::{JVMCIEnv, JVMCIError, JVMCIField, JVMCIObject, JVMCIResult};
use crate::jvmci::CodeInstallResult;
use crate::util::address::raw_align_up;
use crate::vm::{
    BasicType, CodeBlobDescription, CodeBlobRef, CompLevel, MethodRef, NMethodRef, VMBinding, INVOCATION_ENTRY_BCI,
};

/// The code blob an install created.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstalledBlob {
    NMethod(NMethodRef),
    RuntimeStub(CodeBlobRef),
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub result: CodeInstallResult,
    pub blob: Option<InstalledBlob>,
    /// Why the install failed, for the `installationFailureMessage` of the compiled code.
    pub failure_detail: Option<String>,
}

impl InstallOutcome {
    fn failed(result: CodeInstallResult, detail: Option<String>) -> Self {
        InstallOutcome {
            result,
            blob: None,
            failure_detail: detail,
        }
    }
}

/// Compiled code that went through every site, ready to be registered.
#[derive(Debug)]
pub struct PreparedCode {
    pub buffer: CodeBuffer,
    pub offsets: CodeOffsets,
    pub oop_maps: OopMapSet,
    pub exception_handlers: ExceptionHandlerTable,
    pub implicit_exceptions: ImplicitExceptionTable,
    pub debug_info: DebugInformationRecorder,
    pub dependencies: Dependencies,
}

/// Installs one piece of compiled code.
pub struct CodeInstaller<'a, VM: VMBinding> {
    compiled: &'a CompiledCode,
    use_compressed_oops: bool,
    /// Must every method the code was compiled from get an evol_method dependency?
    record_evol_methods: bool,
    relocator: Relocator,
    buffer: CodeBuffer,
    offsets: CodeOffsets,
    oop_maps: OopMapSet,
    exception_handlers: ExceptionHandlerTable,
    implicit_exceptions: ImplicitExceptionTable,
    debug_info: DebugInformationRecorder,
    dependencies: Dependencies,
    /// The kind of the next Java call, from the last invoke mark.
    next_call_type: MarkId,
    invoke_mark_pc: u32,
    phantom: std::marker::PhantomData<VM>,
}

/// An error in the compiled code. The compiler gets it as a `JVMCIError`.
fn code_error(message: String) -> JVMCIError {
    JVMCIError::jvmci(message)
}

impl<'a, VM: VMBinding> CodeInstaller<'a, VM> {
    pub fn new(compiled: &'a CompiledCode, use_compressed_oops: bool, record_evol_methods: bool) -> Self {
        CodeInstaller {
            compiled,
            use_compressed_oops,
            record_evol_methods,
            relocator: Relocator::new(VM::code_cache_bounds()),
            buffer: CodeBuffer::new(),
            offsets: CodeOffsets::new(),
            oop_maps: OopMapSet::new(),
            exception_handlers: ExceptionHandlerTable::new(),
            implicit_exceptions: ImplicitExceptionTable::new(),
            debug_info: DebugInformationRecorder::new(),
            dependencies: Dependencies::new(),
            next_call_type: MarkId::InvokeInvalid,
            invoke_mark_pc: 0,
            phantom: std::marker::PhantomData,
        }
    }

    /// Process the compiled code. `Err(CodeTooLarge)` is returned as `Ok(Err(..))` since it is an
    /// outcome, not an error in the code.
    pub fn prepare(mut self) -> JVMCIResult<Result<PreparedCode, CodeInstallResult>> {
        self.initialize_fields()?;
        self.initialize_dependencies();

        let stub_space = self.relocator.estimate_stub_space(self.compiled);
        let total = raw_align_up(self.compiled.data_section.len(), INSTS_ALIGNMENT)
            + self.compiled.target_code.len()
            + stub_space;
        if total > VM::MAX_CODE_BLOB_SIZE {
            debug!("{} needs {} bytes, more than a code blob can hold", self.compiled.name, total);
            return Ok(Err(CodeInstallResult::CodeTooLarge));
        }

        self.initialize_buffer()?;
        self.process_sites()?;
        if self.buffer.stubs_size() > stub_space {
            return Err(code_error(format!(
                "stubs take {} bytes, more than the {} estimated",
                self.buffer.stubs_size(),
                stub_space
            )));
        }
        for comment in self.compiled.comments.iter() {
            trace!("{}@{}: {}", self.compiled.name, comment.pc_offset, comment.text);
        }

        Ok(Ok(PreparedCode {
            buffer: self.buffer,
            offsets: self.offsets,
            oop_maps: self.oop_maps,
            exception_handlers: self.exception_handlers,
            implicit_exceptions: self.implicit_exceptions,
            debug_info: self.debug_info,
            dependencies: self.dependencies,
        }))
    }

    fn initialize_fields(&self) -> JVMCIResult<()> {
        let compiled = self.compiled;
        let code_size = compiled.target_code.len();
        let alignment = compiled.data_section_alignment;
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(code_error(format!("data section alignment {} is not a power of 2", alignment)));
        }
        if compiled.total_frame_size % 8 != 0 {
            return Err(code_error(format!("total frame size {} is not word aligned", compiled.total_frame_size)));
        }
        for site in compiled.sites.iter() {
            if site.pc_offset as usize >= code_size {
                return Err(code_error(format!(
                    "site pc offset {} is outside of the code ({} bytes)",
                    site.pc_offset, code_size
                )));
            }
        }
        for patch in compiled.data_section_patches.iter() {
            let size = match patch.reference {
                Reference::Object { compressed: true, .. } | Reference::Metaspace { compressed: true, .. } => 4,
                Reference::Object { .. } | Reference::Metaspace { .. } => 8,
                Reference::DataSection { .. } => {
                    return Err(code_error(format!(
                        "data section patch at {} refers to the data section",
                        patch.pc_offset
                    )))
                }
            };
            if patch.pc_offset as usize + size > compiled.data_section.len() {
                return Err(code_error(format!(
                    "data section patch at {} is outside of the data section ({} bytes)",
                    patch.pc_offset,
                    compiled.data_section.len()
                )));
            }
        }
        if let CompiledCodeKind::Nmethod { .. } = compiled.kind {
            if compiled.methods.is_empty() {
                return Err(code_error("nmethod has no methods".to_string()));
            }
        }
        Ok(())
    }

    fn initialize_dependencies(&mut self) {
        for assumption in self.compiled.assumptions.iter() {
            match *assumption {
                Assumption::NoFinalizableSubclass { receiver_type } => {
                    self.dependencies.assert_has_no_finalizable_subclasses(receiver_type)
                }
                Assumption::ConcreteSubtype { context, subtype } => {
                    self.dependencies.assert_abstract_with_unique_concrete_subtype(context, subtype)
                }
                Assumption::LeafType { context } => self.dependencies.assert_leaf_type(context),
                Assumption::ConcreteMethod { context, impl_method } => {
                    self.dependencies.assert_unique_concrete_method(context, impl_method)
                }
                Assumption::CallSiteTargetValue {
                    call_site,
                    method_handle,
                } => self.dependencies.assert_call_site_target_value(call_site, method_handle),
            }
        }
        if self.record_evol_methods {
            // Redefining any of the methods must throw the code away
            for method in self.compiled.methods.iter() {
                self.dependencies.assert_evol_method(*method);
            }
        }
    }

    fn initialize_buffer(&mut self) -> JVMCIResult<()> {
        let compiled = self.compiled;
        self.buffer
            .set_consts(&compiled.data_section, compiled.data_section_alignment as usize);
        self.buffer.set_insts(&compiled.target_code);
        for patch in compiled.data_section_patches.iter() {
            let offset = patch.pc_offset as usize;
            match patch.reference {
                Reference::Object { object, compressed } => {
                    let index = self.buffer.oop_index(object);
                    let written = if compressed {
                        self.buffer
                            .write_u32(Section::Consts, offset, VM::encode_narrow_oop(object))
                    } else {
                        self.buffer
                            .write_u64(Section::Consts, offset, object.to_raw_address().as_usize() as u64)
                    };
                    written.map_err(code_error)?;
                    self.buffer.relocate(
                        Section::Consts,
                        patch.pc_offset,
                        RelocKind::Oop { index, narrow: compressed },
                        Patch::None,
                    );
                }
                Reference::Metaspace { metadata, compressed } => {
                    let index = self.buffer.metadata_index(metadata);
                    let written = if compressed {
                        let klass = metadata.as_klass().ok_or_else(|| {
                            code_error(format!("unexpected compressed pointer to non-class metadata at data offset {}", offset))
                        })?;
                        self.buffer
                            .write_u32(Section::Consts, offset, VM::encode_narrow_klass(klass))
                    } else {
                        self.buffer
                            .write_u64(Section::Consts, offset, metadata.address.as_usize() as u64)
                    };
                    written.map_err(code_error)?;
                    self.buffer.relocate(
                        Section::Consts,
                        patch.pc_offset,
                        RelocKind::Metadata {
                            index,
                            narrow: compressed,
                        },
                        Patch::None,
                    );
                }
                // Rejected by initialize_fields
                Reference::DataSection { .. } => {}
            }
        }
        Ok(())
    }

    fn process_sites(&mut self) -> JVMCIResult<()> {
        let compiled = self.compiled;
        for site in compiled.sites.iter() {
            let pc_offset = site.pc_offset;
            match &site.kind {
                SiteKind::Mark { id } => self.site_mark(pc_offset, *id)?,
                SiteKind::Infopoint { reason, debug_info } => self.site_infopoint(pc_offset, *reason, debug_info)?,
                SiteKind::Call {
                    target,
                    direct,
                    debug_info,
                } => self.site_call(pc_offset, *target, *direct, debug_info.as_ref())?,
                SiteKind::DataPatch { reference } => self.site_data_patch(pc_offset, *reference)?,
                SiteKind::ExceptionHandler { handler_pos } => {
                    self.exception_handlers.add_entry(pc_offset, *handler_pos);
                }
            }
        }
        Ok(())
    }

    fn site_mark(&mut self, pc_offset: u32, id: i32) -> JVMCIResult<()> {
        let mark = MarkId::from_i32(id).ok_or_else(|| code_error(format!("invalid mark id: {}", id)))?;
        match mark {
            MarkId::VerifiedEntry => self.offsets.set(CodeOffset::VerifiedEntry, pc_offset),
            MarkId::UnverifiedEntry => self.offsets.set(CodeOffset::UnverifiedEntry, pc_offset),
            MarkId::OsrEntry => self.offsets.set(CodeOffset::OsrEntry, pc_offset),
            MarkId::ExceptionHandlerEntry => self.offsets.set(CodeOffset::Exceptions, pc_offset),
            MarkId::DeoptHandlerEntry => self.offsets.set(CodeOffset::Deopt, pc_offset),
            MarkId::InvokeInterface | MarkId::InvokeVirtual | MarkId::InvokeStatic | MarkId::InvokeSpecial => {
                self.next_call_type = mark;
                self.invoke_mark_pc = pc_offset;
            }
            // Only marks the call site of an inlined method
            MarkId::InlineInvoke => {}
            MarkId::PollNear | MarkId::PollReturnNear | MarkId::PollFar | MarkId::PollReturnFar => self
                .relocator
                .relocate_poll(&mut self.buffer, pc_offset, mark, VM::polling_page())
                .map_err(code_error)?,
            MarkId::CardTableAddress => self
                .relocator
                .patch_card_table_address(&mut self.buffer, pc_offset, VM::card_table_base())
                .map_err(code_error)?,
            MarkId::CardTableShift => self
                .relocator
                .patch_card_table_shift(&mut self.buffer, pc_offset, VM::card_table_shift())
                .map_err(code_error)?,
            MarkId::InvokeInvalid => return Err(code_error(format!("invalid mark id: {}", id))),
        }
        Ok(())
    }

    fn site_infopoint(&mut self, pc_offset: u32, reason: InfopointReason, debug_info: &DebugInfo) -> JVMCIResult<()> {
        if reason.is_safepoint() {
            self.record_safepoint(pc_offset, debug_info, false)?;
            if reason == InfopointReason::ImplicitException {
                self.implicit_exceptions.append(pc_offset, pc_offset);
            }
        } else if let Some(frame) = &debug_info.frame {
            self.debug_info.add_non_safepoint(pc_offset).map_err(code_error)?;
            let translator = ScopeTranslator::new(self.compiled.total_frame_size);
            let scopes = translator
                .frame_scopes(frame, ScopeMode::BytecodePosition, false)
                .map_err(code_error)?;
            for scope in scopes {
                self.debug_info.describe_scope(scope);
            }
            self.debug_info.end_scopes(pc_offset).map_err(code_error)?;
        }
        Ok(())
    }

    /// Record the oop map and the scopes of a safepoint.
    fn record_safepoint(&mut self, pc_offset: u32, debug_info: &DebugInfo, return_oop: bool) -> JVMCIResult<()> {
        let reference_map = debug_info
            .reference_map
            .as_ref()
            .ok_or_else(|| code_error(format!("safepoint at {} has no reference map", pc_offset)))?;
        let map = OopMap::from_reference_map(reference_map, self.compiled.total_frame_size, self.use_compressed_oops)
            .map_err(code_error)?;
        self.oop_maps.add_gc_map(pc_offset, map);

        self.debug_info.add_safepoint(pc_offset).map_err(code_error)?;
        if let Some(frame) = &debug_info.frame {
            let mut translator = ScopeTranslator::new(self.compiled.total_frame_size);
            translator.record_virtual_objects(debug_info).map_err(code_error)?;
            let scopes = translator
                .frame_scopes(frame, ScopeMode::FullFrame, return_oop)
                .map_err(code_error)?;
            for scope in scopes {
                self.debug_info.describe_scope(scope);
            }
            self.debug_info.set_objects(translator.take_objects());
        }
        self.debug_info.end_scopes(pc_offset).map_err(code_error)
    }

    fn site_call(&mut self, pc_offset: u32, target: CallTarget, direct: bool, debug_info: Option<&DebugInfo>) -> JVMCIResult<()> {
        let next_pc_offset = platform::next_offset(self.buffer.insts(), pc_offset).map_err(code_error)?;
        if let Some(debug_info) = debug_info {
            // The return address is where the frame is described
            let return_oop = match target {
                CallTarget::Method(method) => returns_reference::<VM>(method),
                CallTarget::Foreign(_) => false,
            };
            self.record_safepoint(next_pc_offset, debug_info, return_oop)?;
        }
        match target {
            CallTarget::Foreign(address) => self
                .relocator
                .relocate_foreign_call(&mut self.buffer, pc_offset, address)
                .map_err(code_error)?,
            CallTarget::Method(method) => {
                if self.next_call_type == MarkId::InvokeInvalid {
                    return Err(code_error(format!("call at {} has no invoke mark", pc_offset)));
                }
                trace!(
                    "{} call at {} to {} (direct: {})",
                    if direct { "Direct" } else { "Indirect" },
                    pc_offset,
                    VM::method_name(method),
                    direct
                );
                self.relocator
                    .relocate_java_call::<VM>(&mut self.buffer, pc_offset, self.next_call_type, self.invoke_mark_pc)
                    .map_err(code_error)?;
                self.next_call_type = MarkId::InvokeInvalid;
            }
        }
        Ok(())
    }

    fn site_data_patch(&mut self, pc_offset: u32, reference: Reference) -> JVMCIResult<()> {
        let patched = match reference {
            Reference::Object { object, compressed } => {
                self.relocator
                    .patch_oop::<VM>(&mut self.buffer, pc_offset, object, compressed)
            }
            Reference::Metaspace { metadata, compressed } => {
                self.relocator
                    .patch_metadata::<VM>(&mut self.buffer, pc_offset, metadata, compressed)
            }
            Reference::DataSection { offset } => self
                .relocator
                .patch_data_section_reference(&mut self.buffer, pc_offset, offset),
        };
        patched.map_err(code_error)
    }

    /// Install the compiled code: prepare it, then register it with the VM. `installed_code` is
    /// the mirror to bind; an nmethod without one gets a new default `HotSpotNmethod`.
    pub fn install(
        env: &JVMCIEnv<VM>,
        compiled: &CompiledCode,
        installed_code: Option<JVMCIObject>,
        speculation_log: Option<JVMCIObject>,
    ) -> JVMCIResult<InstallOutcome> {
        let start = Instant::now();
        let outcome = Self::install_timed(env, compiled, installed_code, speculation_log);
        env.jvmci()
            .state()
            .record_code_install(start.elapsed().as_nanos() as u64);
        outcome
    }

    fn install_timed(
        env: &JVMCIEnv<VM>,
        compiled: &CompiledCode,
        installed_code: Option<JVMCIObject>,
        speculation_log: Option<JVMCIObject>,
    ) -> JVMCIResult<InstallOutcome> {
        let record_evol_methods = match env.compile_state() {
            Some(state) => state.jvmti_can_hotswap_or_post_breakpoint(),
            None => VM::jvmti_capabilities().can_hotswap_or_post_breakpoint,
        };
        let installer = CodeInstaller::<VM>::new(compiled, env.jvmci().options.use_compressed_oops, record_evol_methods);
        let prepared = match installer.prepare()? {
            Ok(prepared) => prepared,
            Err(result) => return Ok(InstallOutcome::failed(result, Some("code is too large".to_string()))),
        };
        debug!(
            "Installing {} ({} bytes, {} oop maps, {} dependencies)",
            compiled.name,
            prepared.buffer.total_size(),
            prepared.oop_maps.len(),
            prepared.dependencies.len()
        );

        match compiled.kind {
            CompiledCodeKind::Nmethod {
                method,
                entry_bci,
                compile_id,
                has_unsafe_access,
            } => {
                let comp_level = env
                    .compile_state()
                    .map_or(CompLevel::FullOptimization as i32, |s| s.comp_level());
                let blob = prepared.description(&compiled.name, Some(method), entry_bci, compile_id, comp_level, compiled, has_unsafe_access);
                let mirror = match installed_code {
                    Some(mirror) => mirror,
                    None => {
                        let method_mirror = env.get_jvmci_method(method)?;
                        env.new_hotspot_nmethod(method_mirror, Some(&compiled.name), true, compile_id as i64)?
                    }
                };
                let registered = env
                    .runtime()
                    .register_method(env, method, &blob, mirror, speculation_log)?;
                if let Some(nm) = registered.nmethod {
                    bind_nmethod_mirror::<VM>(env, mirror, nm)?;
                }
                Ok(InstallOutcome {
                    result: registered.result,
                    blob: registered.nmethod.map(InstalledBlob::NMethod),
                    failure_detail: registered.failure_detail,
                })
            }
            CompiledCodeKind::RuntimeStub => {
                let blob = prepared.description(
                    &compiled.name,
                    None,
                    INVOCATION_ENTRY_BCI,
                    0,
                    CompLevel::None as i32,
                    compiled,
                    false,
                );
                let stub = match VM::register_runtime_stub(&blob) {
                    Some(stub) => stub,
                    None => {
                        warn!("CodeCache is full while installing stub {}", compiled.name);
                        VM::handle_full_code_cache();
                        return Ok(InstallOutcome::failed(CodeInstallResult::CacheFull, None));
                    }
                };
                debug!("Installed runtime stub {} at {}", compiled.name, stub.0);
                if let Some(mirror) = installed_code {
                    env.set_installed_code_address(mirror, stub.0)?;
                    env.set_int_field(JVMCIField::HotSpotInstalledCodeSize, mirror, prepared.buffer.total_size() as i32)?;
                }
                Ok(InstallOutcome {
                    result: CodeInstallResult::Ok,
                    blob: Some(InstalledBlob::RuntimeStub(stub)),
                    failure_detail: None,
                })
            }
        }
    }
}

impl PreparedCode {
    #[allow(clippy::too_many_arguments)]
    fn description<'a>(
        &'a self,
        name: &'a str,
        method: Option<MethodRef>,
        entry_bci: i32,
        compile_id: i32,
        comp_level: i32,
        compiled: &CompiledCode,
        has_unsafe_access: bool,
    ) -> CodeBlobDescription<'a> {
        CodeBlobDescription {
            name,
            method,
            entry_bci,
            compile_id,
            comp_level,
            code: &self.buffer,
            offsets: &self.offsets,
            frame_size: compiled.total_frame_size as usize,
            oop_maps: &self.oop_maps,
            exception_handlers: &self.exception_handlers,
            implicit_exceptions: &self.implicit_exceptions,
            debug_info: &self.debug_info,
            dependencies: &self.dependencies,
            has_unsafe_access,
            has_wide_vectors: compiled.has_wide_vectors,
        }
    }
}

/// Does the method return a reference? The return value of a call to it is then an oop.
fn returns_reference<VM: VMBinding>(method: MethodRef) -> bool {
    VM::method_signature(method)
        .rsplit_once(')')
        .and_then(|(_, ret)| BasicType::from_descriptor(ret))
        .map_or(false, |ty| ty.is_reference())
}

/// Point the mirror at a newly installed nmethod.
pub(crate) fn bind_nmethod_mirror<VM: VMBinding>(env: &JVMCIEnv<VM>, mirror: JVMCIObject, nm: NMethodRef) -> JVMCIResult<()> {
    let state = VM::nmethod_state(nm);
    env.set_installed_code_address(mirror, nm.0)?;
    if state.is_in_use {
        if let Some(entry) = state.verified_entry_point {
            env.set_installed_code_entry_point(mirror, entry)?;
        }
    }
    let version = env.get_long_field(JVMCIField::InstalledCodeVersion, mirror)?;
    env.set_long_field(JVMCIField::InstalledCodeVersion, mirror, version + 1)?;
    env.set_int_field(JVMCIField::HotSpotInstalledCodeSize, mirror, state.size as i32)?;
    env.set_long_field(JVMCIField::HotSpotInstalledCodeCodeStart, mirror, state.code_begin.as_jlong())?;
    // `compileIdSnapshot` is fixed when the mirror is created; `get_nmethod` compares against it.
    env.set_int_field(JVMCIField::HotSpotInstalledCodeCodeSize, mirror, state.code_size as i32)
}
