//! The link between an nmethod and the compiler objects that describe it.
//!
//! Each nmethod installed by the runtime has one [`NMethodData`]. It holds weak references to the
//! `HotSpotNmethod` mirror and to the speculation log, so the compiler heap alone decides when
//! those objects die. When a mirror of a non-default nmethod dies, the nmethod is made not entrant
//! so the code cache can reclaim it.

use crate::env::{JVMCIClass, JVMCIEnv, JVMCIError, JVMCIField, JVMCIHandle, JVMCIObject, JVMCIResult, Mode};
use crate::jvmci::JVMCI;
use crate::util::{Address, VMThread};
use crate::vm::{NMethodRef, VMBinding};

#[derive(Debug)]
pub struct NMethodData {
    /// Weak reference to the `HotSpotNmethod` mirror. Only host mirrors are tracked here; a remote
    /// mirror is updated by the compiler itself.
    nmethod_mirror: Option<JVMCIHandle>,
    /// The name of the mirror, kept for diagnostics after the mirror is gone.
    nmethod_mirror_name: Option<String>,
    /// Weak reference to the speculation log, in the heap of the compiler that installed the code.
    speculation_log: Option<JVMCIHandle>,
    /// Does losing the mirror invalidate the nmethod? False for the default code of a method.
    triggers_invalidation: bool,
}

impl NMethodData {
    pub fn new(
        env: &JVMCIEnv<impl VMBinding>,
        nmethod_mirror: JVMCIObject,
        speculation_log: Option<JVMCIObject>,
        triggers_invalidation: bool,
    ) -> JVMCIResult<NMethodData> {
        let speculation_log = speculation_log.map(|log| env.make_weak(log)).transpose()?;
        let mirror = if env.is_host() {
            Some(env.make_weak(nmethod_mirror)?)
        } else {
            None
        };
        let mut name = None;
        if env.is_instance_of(nmethod_mirror, JVMCIClass::InstalledCode)? {
            if let Some(n) = env.get_object_field(JVMCIField::InstalledCodeName, nmethod_mirror)? {
                name = Some(env.as_utf8_string(n)?);
            }
        }
        Ok(NMethodData {
            nmethod_mirror: mirror,
            nmethod_mirror_name: name,
            speculation_log,
            triggers_invalidation,
        })
    }

    pub fn nmethod_mirror(&self) -> Option<JVMCIHandle> {
        self.nmethod_mirror
    }

    pub fn nmethod_mirror_name(&self) -> Option<&str> {
        self.nmethod_mirror_name.as_deref()
    }

    pub fn speculation_log(&self) -> Option<JVMCIHandle> {
        self.speculation_log
    }

    pub fn triggers_invalidation(&self) -> bool {
        self.triggers_invalidation
    }

    /// Must the data be destroyed outside a GC pause? Destroying a reference into a remote heap
    /// calls into that heap, which may block.
    pub fn needs_deferred_release(&self) -> bool {
        self.speculation_log.is_some_and(|log| log.mode() == Mode::Remote)
    }

    /// Attach a mirror created after the nmethod was installed.
    pub fn add_nmethod_mirror<VM: VMBinding>(&mut self, env: &JVMCIEnv<VM>, mirror: JVMCIObject) -> JVMCIResult<()> {
        // Only HotSpotNmethod instances are tracked directly; HotSpotNmethodHandle instances are
        // updated cooperatively.
        if !env.is_host() {
            return Ok(());
        }
        if self.nmethod_mirror.is_some() {
            return Err(JVMCIError::illegal_argument(
                "Cannot overwrite existing HotSpotNmethod object for nmethod",
            ));
        }
        self.nmethod_mirror = Some(env.make_weak(mirror)?);
        Ok(())
    }

    /// Called while the GC unloads nmethods. Clears a dead mirror, and makes the nmethod not
    /// entrant if the mirror was the only thing keeping it in use.
    pub fn update_nmethod_mirror_in_gc<VM: VMBinding>(&mut self, nm: NMethodRef) {
        let mirror = match self.nmethod_mirror {
            Some(mirror) => mirror,
            None => return,
        };
        let address = match mirror.host_address() {
            Some(address) => address,
            None => return,
        };
        if VM::resolve_handle(address).is_none() {
            self.clear_nmethod_mirror::<VM>();
            if self.triggers_invalidation {
                debug!(
                    "Mirror {} of {:?} was collected, making it not entrant",
                    self.nmethod_mirror_name.as_deref().unwrap_or("<unnamed>"),
                    nm
                );
                VM::make_not_entrant(nm);
            }
        }
    }

    /// Bring the mirror up to date with the state of the nmethod: a dead nmethod unbinds the
    /// mirror, a not entrant one only zeroes its entry point.
    pub fn invalidate_mirror<VM: VMBinding>(&mut self, jvmci: &JVMCI<VM>, thread: VMThread, nm: NMethodRef) {
        let mirror = match self.nmethod_mirror {
            Some(mirror) => mirror,
            None => return,
        };
        let state = VM::nmethod_state(nm);
        {
            let env = JVMCIEnv::with_mode(jvmci, thread, Mode::Host);
            let object = match env.resolve_handle(&mirror) {
                Ok(Some(object)) => object,
                Ok(None) => {
                    // The referent is gone
                    drop(env);
                    self.clear_nmethod_mirror::<VM>();
                    return;
                }
                Err(e) => {
                    env.describe_exception(&e);
                    return;
                }
            };
            let result = (|| -> JVMCIResult<()> {
                let current = env.get_installed_code_address(object)?;
                if current == nm.0 {
                    if !state.is_alive {
                        // Calls through the mirror will throw InvalidInstalledCodeException
                        env.set_installed_code_address(object, Address::ZERO)?;
                        env.set_installed_code_entry_point(object, Address::ZERO)?;
                    } else if state.is_not_entrant() {
                        // Keep the address so existing activations can still be found
                        env.set_installed_code_entry_point(object, Address::ZERO)?;
                    }
                }
                Ok(())
            })();
            if let Err(e) = result {
                env.describe_exception(&e);
            }
        }
        if !state.is_alive {
            self.clear_nmethod_mirror::<VM>();
            self.clear_speculation_log::<VM>(jvmci, thread, false);
        }
    }

    /// Record the speculation that just failed in the thread in the speculation log.
    pub fn update_speculation<VM: VMBinding>(&mut self, jvmci: &JVMCI<VM>, thread: VMThread) {
        let speculation = VM::pending_failed_speculation(thread);
        if speculation == 0 {
            return;
        }
        match self.speculation_log {
            Some(log) => {
                let env = JVMCIEnv::with_mode(jvmci, thread, log.mode());
                let result = (|| -> JVMCIResult<bool> {
                    let object = match env.resolve_handle(&log)? {
                        Some(object) => object,
                        None => return Ok(false),
                    };
                    if env.get_long_field(JVMCIField::HotSpotSpeculationLogLastFailed, object)? != 0 {
                        debug!("A speculation that was not collected by the compiler is being overwritten");
                    }
                    trace!("Saving speculation to speculation log");
                    env.set_long_field(JVMCIField::HotSpotSpeculationLogLastFailed, object, speculation)?;
                    Ok(true)
                })();
                match result {
                    Ok(true) => {}
                    Ok(false) => {
                        // The weak reference was cleared
                        if let Err(e) = env.destroy_handle(log) {
                            env.describe_exception(&e);
                        }
                        self.speculation_log = None;
                    }
                    Err(e) => env.describe_exception(&e),
                }
            }
            None => trace!("Speculation present but no speculation log"),
        }
        VM::set_pending_failed_speculation(thread, 0);
    }

    /// Drop the weak reference to the mirror. Mirrors are always in the host heap.
    pub fn clear_nmethod_mirror<VM: VMBinding>(&mut self) {
        if let Some(address) = self.nmethod_mirror.take().and_then(|m| m.host_address()) {
            VM::destroy_weak_handle(address);
        }
    }

    /// Drop the weak reference to the speculation log. A remote log is only dropped if `force` is
    /// set, since that calls into the remote heap.
    pub fn clear_speculation_log<VM: VMBinding>(&mut self, jvmci: &JVMCI<VM>, thread: VMThread, force: bool) {
        let log = match self.speculation_log {
            Some(log) => log,
            None => return,
        };
        match log.host_address() {
            Some(address) => VM::destroy_weak_handle(address),
            None if force => {
                let env = JVMCIEnv::with_mode(jvmci, thread, Mode::Remote);
                if let Err(e) = env.destroy_handle(log) {
                    env.describe_exception(&e);
                }
            }
            None => return,
        }
        self.speculation_log = None;
    }

    /// Destroy the data and everything it references.
    pub fn destroy<VM: VMBinding>(mut self, jvmci: &JVMCI<VM>, thread: VMThread) {
        self.clear_nmethod_mirror::<VM>();
        self.clear_speculation_log(jvmci, thread, true);
        if self.nmethod_mirror.is_some() || self.speculation_log.is_some() {
            VM::fatal("NMethodData references must be clear when it is destroyed");
        }
    }
}
