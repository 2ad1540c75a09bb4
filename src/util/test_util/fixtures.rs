// Some tests are conditionally compiled. So not all the code in this module will be used. We simply allow dead code in this module.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::env::{JVMCIEnv, JVMCIObject, Mode};
use crate::util::test_util::mock_vm::host::{test_thread, with_host};
use crate::util::test_util::mock_vm::remote::MockRemoteVM;
use crate::util::test_util::mock_vm::MockVM;
use crate::util::{ObjectReference, VMThread};
use crate::vm::{ConstantPoolRef, KlassRef, MethodRef};
use crate::{JVMCIBuilder, JVMCI};

/// Debug output that tests can read back.
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A JVMCI instance on the mock host, with the compiler in the host heap.
pub struct JVMCIFixture {
    pub jvmci: JVMCI<MockVM>,
    pub thread: VMThread,
    pub output: CapturedOutput,
}

impl JVMCIFixture {
    pub fn create() -> Self {
        Self::create_with_builder(|_| {})
    }

    pub fn create_with_builder<F>(with_builder: F) -> Self
    where
        F: FnOnce(&mut JVMCIBuilder),
    {
        let output = CapturedOutput::default();
        let mut builder = JVMCIBuilder::new();
        assert!(builder.set_option("EnableJVMCI", "true"));
        assert!(builder.set_option("UseJVMCICompiler", "true"));
        builder.set_debug_output(Arc::new(Mutex::new(output.clone())));
        with_builder(&mut builder);
        let jvmci = builder.build::<MockVM>().unwrap();
        let thread = test_thread(1);
        with_host(|host| host.thread(thread).is_compiler_thread = true);
        JVMCIFixture { jvmci, thread, output }
    }

    /// An environment in the heap of the compiler.
    pub fn env(&self) -> JVMCIEnv<'_, MockVM> {
        JVMCIEnv::for_thread(&self.jvmci, self.thread)
    }

    pub fn host_env(&self) -> JVMCIEnv<'_, MockVM> {
        JVMCIEnv::with_mode(&self.jvmci, self.thread, Mode::Host)
    }
}

/// A JVMCI instance whose compiler lives in a [`MockRemoteVM`].
pub struct RemoteJVMCIFixture {
    pub base: JVMCIFixture,
    pub remote: MockRemoteVM,
}

impl RemoteJVMCIFixture {
    pub fn create() -> Self {
        let remote = MockRemoteVM::new();
        let vm = remote.clone();
        let base = JVMCIFixture::create_with_builder(move |builder| builder.set_remote_vm(Arc::new(vm)));
        assert!(base.jvmci.has_remote_runtime());
        RemoteJVMCIFixture { base, remote }
    }

    pub fn jvmci(&self) -> &JVMCI<MockVM> {
        &self.base.jvmci
    }

    pub fn thread(&self) -> VMThread {
        self.base.thread
    }
}

/// A loaded class `test/Holder` with one compilable method `int run(int)`.
pub struct MethodFixture {
    pub klass: KlassRef,
    pub method: MethodRef,
    pub constants: ConstantPoolRef,
}

impl MethodFixture {
    pub fn create() -> Self {
        Self::create_named("test/Holder", "run", "(I)I")
    }

    pub fn create_named(class: &str, name: &str, signature: &str) -> Self {
        with_host(|host| {
            let klass = host.define_klass(class, Some("java/lang/Object"));
            let method = host.define_method(klass, name, signature);
            // iload_1; iconst_1; iadd; ireturn
            host.method_mut(method).bytecodes = vec![0x1b, 0x04, 0x60, 0xac];
            host.method_mut(method).line_numbers = vec![(0, 10), (2, 11)];
            let constants = host.klass(klass).constants;
            MethodFixture {
                klass,
                method,
                constants,
            }
        })
    }

    pub fn mirror(&self, env: &JVMCIEnv<MockVM>) -> JVMCIObject {
        env.get_jvmci_method(self.method).unwrap()
    }
}

/// A host object of class `java/lang/Object`.
pub fn new_host_object() -> ObjectReference {
    with_host(|host| host.new_object("java/lang/Object"))
}
