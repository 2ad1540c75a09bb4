use super::mock_test_prelude::*;

use crate::runtime::stubs;

#[test]
pub fn log_objects() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let string = with_host(|host| host.new_string("hello"));
            let object = new_host_object();

            stubs::log_object(&fixture.jvmci, None, false, true);
            stubs::log_object(&fixture.jvmci, Some(string), true, true);
            stubs::log_object(&fixture.jvmci, Some(object), true, false);
            assert_eq!(
                fixture.output.contents(),
                format!("NULL\nhello\njava/lang/Object@{}", object)
            );

            // A dead object is only printed as its address
            assert!(with_host(|host| host.collect(object)));
            let fixture = JVMCIFixture::create();
            stubs::log_object(&fixture.jvmci, Some(object), false, false);
            assert_eq!(fixture.output.contents(), format!("{}", object));
        },
        no_cleanup,
    )
}

#[test]
pub fn log_primitives() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let jvmci = &fixture.jvmci;
            stubs::log_primitive(jvmci, 'Z', 1, false);
            stubs::log_primitive(jvmci, 'I', -5, true);
            stubs::log_primitive(jvmci, 'C', 'A' as i64, true);
            stubs::log_primitive(jvmci, 'F', 2.5f32.to_bits() as i64, true);
            stubs::log_primitive(jvmci, 'D', 1.5f64.to_bits() as i64, true);
            // Not a primitive type
            stubs::log_primitive(jvmci, 'Q', 0, true);
            assert_eq!(fixture.output.contents(), "true-5\nA\n2.500000\n1.500000\n");
        },
        no_cleanup,
    )
}

#[test]
pub fn printf_formats() {
    with_mockvm(
        default_setup,
        || {
            let format = |f: &str, args: &[i64]| stubs::format_printf::<MockVM>(f, args);
            assert_eq!(format("%d %5x|%-4d|", &[42, 255, 7]), "42    ff|7   |");
            assert_eq!(format("%04d %#x %X", &[-3, 255, 255]), "-003 0xff FF");
            assert_eq!(format("100%% %c%c", &[b'o' as i64, b'k' as i64]), "100% ok");
            assert_eq!(format("%.2f", &[1.23456f64.to_bits() as i64]), "1.23");
            assert_eq!(format("%ld %lu", &[-1, -1]), "-1 18446744073709551615");
            // Missing arguments print as zero
            assert_eq!(format("%d %d %d %d", &[1, 2, 3]), "1 2 3 0");
            assert_eq!(format("trailing %", &[]), "trailing %");
            // Oversized widths and precisions are clamped
            let wide = format("%99999999999999999999d", &[1]);
            assert_eq!(wide.len(), 4096);
            assert!(wide.ends_with(" 1"));
            let precise = format("%.99999999999999999999f", &[1.5f64.to_bits() as i64]);
            assert_eq!(precise.len(), "1.".len() + 4096);

            let object = new_host_object();
            let raw = object.value() as i64;
            assert_eq!(format("%s", &[raw]), format!("{:#x} is an oop", raw));
            assert_eq!(format("%s", &[0x10]), "0x10");
        },
        no_cleanup,
    )
}

#[test]
pub fn messages() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            stubs::log_printf(&fixture.jvmci, "a=%d b=%d c=%d\n", 1, 2, 3);
            stubs::vm_message(&fixture.jvmci, false, Some("value %x\n"), 255, 0, 0);
            stubs::vm_message(&fixture.jvmci, false, None, 255, 0, 0);
            assert_eq!(fixture.output.contents(), "a=1 b=2 c=3\nvalue ff\n0xff");
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "fatal error: bad value 3")]
pub fn vm_message_reports_errors() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            stubs::vm_message(&fixture.jvmci, true, Some("bad value %d"), 3, 0, 0);
        },
        no_cleanup,
    )
}

#[test]
#[should_panic(expected = "fatal error: at the end: x=5")]
pub fn vm_error_is_fatal() {
    with_mockvm(
        default_setup,
        || {
            stubs::vm_error::<MockVM>(Some("at the end"), Some("x=%d"), 5);
        },
        no_cleanup,
    )
}

#[test]
pub fn validate_objects() {
    with_mockvm(
        default_setup,
        || {
            let fixture = JVMCIFixture::create();
            let parent = new_host_object();
            let child = new_host_object();
            assert!(stubs::validate_object(&fixture.jvmci, parent, child));
            assert_eq!(fixture.output.contents(), "");

            assert!(with_host(|host| host.collect(parent)));
            assert!(!stubs::validate_object(&fixture.jvmci, parent, child));
            assert_eq!(fixture.output.contents(), format!("Parent Object {} not in heap\n", parent));
        },
        no_cleanup,
    )
}
