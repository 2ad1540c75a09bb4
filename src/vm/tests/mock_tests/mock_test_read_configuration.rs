use super::mock_test_prelude::*;

use crate::compiler_to_vm;
use crate::util::test_util::mock_vm::java_heap::ObjectId;

const VM_FIELD: &str = "jdk/vm/ci/hotspot/VMField";
const VM_FLAG: &str = "jdk/vm/ci/hotspot/VMFlag";

fn host_id(object: Option<JVMCIObject>) -> ObjectId {
    object_id(object.unwrap().as_host().unwrap())
}

fn string_field(id: ObjectId, class: &str, name: &str) -> Option<String> {
    with_host(|host| {
        host.heap
            .get_field(id, class, name, "Ljava/lang/String;")
            .as_object()
            .flatten()
            .and_then(|s| host.heap.string_value(s))
    })
}

fn drop_unsupported_flags() {
    with_host(|host| host.flags.retain(|f| !matches!(f.value, FlagValue::Other(_))));
}

#[test]
pub fn configuration_layout() {
    with_mockvm(
        default_setup,
        || {
            drop_unsupported_flags();
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let data = compiler_to_vm::read_configuration(&env).unwrap();
            assert_eq!(env.get_array_length(data.0).unwrap(), 5);
            let part = |i: i32| JVMCIObjectArray(env.get_object_at(data, i).unwrap().unwrap());

            let fields = part(0);
            assert_eq!(env.get_array_length(fields.0).unwrap(), 1);
            let field = host_id(env.get_object_at(fields, 0).unwrap());
            assert_eq!(string_field(field, VM_FIELD, "name").as_deref(), Some("Klass::_name"));
            assert_eq!(string_field(field, VM_FIELD, "type").as_deref(), Some("Symbol*"));
            let offset = with_host(|host| host.heap.get_field(field, VM_FIELD, "offset", "J").as_long());
            assert_eq!(offset, Some(16));

            // Int constants come before long constants, as name/value pairs
            let constants = part(1);
            assert_eq!(env.get_array_length(constants.0).unwrap(), 4);
            let name = env.get_object_at(constants, 0).unwrap().unwrap();
            assert_eq!(env.as_utf8_string(name).unwrap(), "Method::_caller_sensitive");
            let value = env.get_object_at(constants, 3).unwrap().unwrap();
            assert_eq!(env.get_boxed_value(value).unwrap(), PrimitiveValue::Long(0x7fff_ffff));

            let flags = part(3);
            let expected_flags = with_host(|host| host.flags.len()) as i32;
            assert_eq!(env.get_array_length(flags.0).unwrap(), expected_flags);
            let flag = host_id(env.get_object_at(flags, 1).unwrap());
            assert_eq!(string_field(flag, VM_FLAG, "name").as_deref(), Some("CodeEntryAlignment"));
            assert_eq!(string_field(flag, VM_FLAG, "type").as_deref(), Some("intx"));

            let intrinsics = part(4);
            assert_eq!(env.get_array_length(intrinsics.0).unwrap(), 1);
        },
        no_cleanup,
    )
}

#[test]
pub fn equal_values_share_one_object() {
    with_mockvm(
        default_setup,
        || {
            drop_unsupported_flags();
            with_host(|host| {
                let unpack = host.addresses[0].1;
                host.addresses.push(("SharedRuntime::deopt_blob_unpack_alias".to_string(), unpack));
            });
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let data = compiler_to_vm::read_configuration(&env).unwrap();
            let addresses = JVMCIObjectArray(env.get_object_at(data, 2).unwrap().unwrap());
            assert_eq!(env.get_array_length(addresses.0).unwrap(), 4);
            let first = env.get_object_at(addresses, 1).unwrap();
            let second = env.get_object_at(addresses, 3).unwrap();
            assert!(env.equals(first, second).unwrap());

            // The two boolean flags that are true share the canonical box
            with_host(|host| {
                host.flags.push(VMFlag {
                    name: "UseTLAB".to_string(),
                    value: FlagValue::Bool(true),
                    address: host.flags[0].address,
                })
            });
            let data = compiler_to_vm::read_configuration(&env).unwrap();
            let flags = JVMCIObjectArray(env.get_object_at(data, 3).unwrap().unwrap());
            let length = env.get_array_length(flags.0).unwrap();
            let value_of = |i: i32| {
                let flag = host_id(env.get_object_at(flags, i).unwrap());
                with_host(|host| host.heap.get_field(flag, VM_FLAG, "value", "Ljava/lang/Object;").as_object().flatten())
            };
            assert_eq!(value_of(0), value_of(length - 1));
        },
        no_cleanup,
    )
}

#[test]
pub fn unsupported_flag_type_fails_the_export() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let error = compiler_to_vm::read_configuration(&env).unwrap_err();
            assert_eq!(error.kind(), Some(ExceptionKind::JVMCIError));
            assert_eq!(error.message(), Some("VM flag OnError has unsupported type ccstrlist"));
        },
        no_cleanup,
    )
}

#[test]
pub fn flag_values() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let env = fixture.env();
            let sentinel = env.create_string("sentinel").unwrap();

            let name = env.create_string("CodeEntryAlignment").unwrap();
            let value = compiler_to_vm::get_flag_value(&env, Some(name), sentinel).unwrap().unwrap();
            assert_eq!(env.get_boxed_value(value).unwrap(), PrimitiveValue::Long(32));

            let name = env.create_string("CompileThresholdScaling").unwrap();
            let value = compiler_to_vm::get_flag_value(&env, Some(name), sentinel).unwrap().unwrap();
            assert_eq!(env.get_boxed_value(value).unwrap(), PrimitiveValue::Double(1.0));

            // An unset string flag is null
            let name = env.create_string("JVMCILibPath").unwrap();
            assert_eq!(compiler_to_vm::get_flag_value(&env, Some(name), sentinel).unwrap(), None);

            let name = env.create_string("NoSuchFlag").unwrap();
            assert_eq!(
                compiler_to_vm::get_flag_value(&env, Some(name), sentinel).unwrap(),
                Some(sentinel)
            );

            assert_eq!(
                compiler_to_vm::get_flag_value(&env, None, sentinel).unwrap_err(),
                JVMCIError::null_pointer()
            );
        },
        no_cleanup,
    )
}

#[test]
pub fn unknown_flags_get_a_suggestion() {
    with_mockvm(
        default_setup,
        || {
            assert_eq!(
                compiler_to_vm::lookup_flag::<MockVM>("UseCompressedOops").unwrap().value,
                FlagValue::Bool(true)
            );
            let message = compiler_to_vm::lookup_flag::<MockVM>("UseCompresedOops").unwrap_err();
            assert_eq!(
                message,
                "Unrecognized VM option 'UseCompresedOops'\nDid you mean '(+/-)UseCompressedOops'?"
            );
            let message = compiler_to_vm::lookup_flag::<MockVM>("CodeEntryAlignmnt").unwrap_err();
            assert!(message.ends_with("Did you mean 'CodeEntryAlignment=<value>'?"), "{}", message);

            let message = compiler_to_vm::lookup_flag::<MockVM>("Xyzzy").unwrap_err();
            assert_eq!(message, "Unrecognized VM option 'Xyzzy'");
        },
        no_cleanup,
    )
}
