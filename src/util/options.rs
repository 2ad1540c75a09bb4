use std::default::Default;

/// The separator used to split `jvmci_lib_args` when none is given.
pub const DEFAULT_LIB_ARGS_SEP: char = ' ';

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Runtime options. Each option mirrors a HotSpot `-XX:` flag that the JVMCI runtime consults.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake-case name. Returns false and keeps the current
            /// value if the value cannot be parsed or does not pass validation.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by the builder) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            eprintln!("Warn: unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        eprintln!("Warn: unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        eprintln!("Warn: unable to set {}={:?}. Unknown option.", s, val);
                        false
                    }
                }
            }

            /// Is the named option still at its built-in default value?
            pub fn is_default(&self, s: &str) -> bool {
                match s {
                    $(stringify!($name) => {
                        let default: $type = $default;
                        self.$name == default
                    })*
                    _ => true,
                }
            }

            /// Names of all the options, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name)),*];
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options {
                    $($name: $default),*
                };

                // If we have env vars that start with JVMCI_ and match any option (such as JVMCI_USE_FAST_LOCKING),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "JVMCI_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Enable the JVMCI compiler interface.
    enable_jvmci:                  bool   [always_valid] = false,
    // Use the JVMCI compiler as the top tier compiler.
    use_jvmci_compiler:            bool   [always_valid] = false,
    // Run the JVMCI compiler from a shared library with its own heap.
    use_jvmci_native_library:      bool   [always_valid] = false,
    // Path of the shared library that hosts the compiler runtime. Empty means the default library name.
    jvmci_lib_path:                String [always_valid] = String::new(),
    // Extra arguments passed to the VM created inside the shared library.
    jvmci_lib_args:                String [always_valid] = String::new(),
    // Separator for the arguments in `jvmci_lib_args`.
    jvmci_lib_args_sep:            char   [always_valid] = DEFAULT_LIB_ARGS_SEP,
    // Use the fast locking path in the monitorenter/monitorexit stubs.
    jvmci_use_fast_locking:        bool   [always_valid] = true,
    // Biased locking is available in the host VM.
    use_biased_locking:            bool   [always_valid] = false,
    // Compiled code may skip card marks for stores into freshly allocated objects.
    reduce_initial_card_marks:     bool   [always_valid] = true,
    // Stress deoptimization. The new_array stub alternates between returning and deoptimizing.
    deoptimize_a_lot:              bool   [always_valid] = false,
    // Object references in the heap are compressed to 32 bits.
    use_compressed_oops:           bool   [always_valid] = true,
    // Class pointers in object headers are compressed to 32 bits.
    use_compressed_class_pointers: bool   [always_valid] = true,
    // Bootstrap the JVMCI compiler by compiling itself before running the application.
    bootstrap_jvmci:               bool   [always_valid] = false,
    // Print progress while bootstrapping.
    print_bootstrap:               bool   [always_valid] = true,
    // Number of compiler threads used by the JVMCI compiler.
    jvmci_threads:                 usize  [|v: &usize| *v >= 1] = 1,
    // Trace level for the JVMCI runtime. Level 1 maps to debug logging, levels above to trace logging.
    jvmci_trace_level:             usize  [|v: &usize| *v <= 5] = 0,
}

impl Options {
    /// Set an option from a HotSpot style CamelCase flag name such as `JVMCIUseFastLocking`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let sr = camelcase_to_snake_case(s);
        let result = self.set_from_str(sr.as_str(), val);

        trace!("Trying to process option pair: ({})", sr);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// Check that the options make sense together. Options that only matter when another option is
    /// on may not be set while it is off. Setting `use_jvmci_compiler` turns on `enable_jvmci`.
    pub fn check_consistent(&mut self) -> Result<(), String> {
        // Checks that a given option is not set if a given guard option is false.
        macro_rules! check_not_set {
            ($flag:ident, $guard:ident) => {
                if !self.$guard && !self.is_default(stringify!($flag)) {
                    return Err(format!(
                        "Improperly specified VM option '{}': '{}' must be enabled",
                        stringify!($flag),
                        stringify!($guard)
                    ));
                }
            };
        }

        if !self.use_jvmci_compiler {
            for name in ["bootstrap_jvmci", "print_bootstrap"] {
                if !self.is_default(name) {
                    warn!("{} has no effect without use_jvmci_compiler", name);
                }
            }
        }
        check_not_set!(jvmci_threads, use_jvmci_compiler);

        if self.use_jvmci_compiler {
            if !self.is_default("enable_jvmci") && !self.enable_jvmci {
                return Err(
                    "Improperly specified VM option use_jvmci_compiler: enable_jvmci cannot be disabled"
                        .to_string(),
                );
            }
            self.enable_jvmci = true;
            if self.jvmci_threads < 1 {
                return Err(format!(
                    "Improperly specified VM option 'jvmci_threads': must be at least 1, got {}",
                    self.jvmci_threads
                ));
            }
        }

        check_not_set!(jvmci_trace_level, enable_jvmci);
        check_not_set!(jvmci_use_fast_locking, enable_jvmci);
        check_not_set!(use_jvmci_native_library, enable_jvmci);
        check_not_set!(jvmci_lib_path, enable_jvmci);
        check_not_set!(jvmci_lib_args, enable_jvmci);
        check_not_set!(jvmci_lib_args_sep, enable_jvmci);
        Ok(())
    }

    /// Split `jvmci_lib_args` on `jvmci_lib_args_sep`, skipping empty tokens.
    pub fn lib_args(&self) -> Vec<String> {
        self.jvmci_lib_args
            .split(self.jvmci_lib_args_sep)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

/// Convert a HotSpot flag name to the option name. Runs of capitals are kept together as one
/// word, so `UseJVMCICompiler` becomes `use_jvmci_compiler`.
fn camelcase_to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut sr = String::with_capacity(s.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev_lower = chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_lower || (chars[i - 1].is_uppercase() && next_lower) {
                sr.push('_');
            }
        }
        for c in c.to_lowercase() {
            sr.push(c);
        }
    }
    sr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert!(options.jvmci_use_fast_locking);
            assert_eq!(options.jvmci_threads, 1);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("JVMCI_JVMCI_THREADS", "4");

                    let options = Options::default();
                    assert_eq!(options.jvmci_threads, 4);
                },
                || {
                    std::env::remove_var("JVMCI_JVMCI_THREADS");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // zero threads does not pass validation, so the default is used
                    std::env::set_var("JVMCI_JVMCI_THREADS", "0");

                    let options = Options::default();
                    assert_eq!(options.jvmci_threads, 1);
                },
                || {
                    std::env::remove_var("JVMCI_JVMCI_THREADS");
                },
            )
        })
    }

    #[test]
    fn camelcase_names() {
        assert_eq!(camelcase_to_snake_case("UseJVMCICompiler"), "use_jvmci_compiler");
        assert_eq!(camelcase_to_snake_case("JVMCIUseFastLocking"), "jvmci_use_fast_locking");
        assert_eq!(camelcase_to_snake_case("EnableJVMCI"), "enable_jvmci");
        assert_eq!(camelcase_to_snake_case("DeoptimizeALot"), "deoptimize_a_lot");
        assert_eq!(camelcase_to_snake_case("JVMCILibArgsSep"), "jvmci_lib_args_sep");
    }

    #[test]
    fn set_camelcase() {
        serial_test(|| {
            let mut options = Options::default();
            assert!(options.set_from_camelcase_str("JVMCITraceLevel", "2"));
            assert_eq!(options.jvmci_trace_level, 2);
            assert!(!options.set_from_camelcase_str("JVMCITraceLevel", "9"));
            assert_eq!(options.jvmci_trace_level, 2);
        })
    }

    #[test]
    fn compiler_implies_enable() {
        serial_test(|| {
            let mut options = Options::default();
            options.set_from_str("use_jvmci_compiler", "true");
            assert!(options.check_consistent().is_ok());
            assert!(options.enable_jvmci);
        })
    }

    #[test]
    fn compiler_with_disabled_jvmci() {
        serial_test(|| {
            let mut options = Options::default();
            options.set_from_str("enable_jvmci", "true");
            options.set_from_str("enable_jvmci", "false");
            options.set_from_str("use_jvmci_compiler", "true");
            // enable_jvmci=false is the default value, so this is not an explicit disable
            assert!(options.check_consistent().is_ok());
        })
    }

    #[test]
    fn option_without_guard() {
        serial_test(|| {
            let mut options = Options::default();
            options.set_from_str("jvmci_trace_level", "1");
            let err = options.check_consistent().unwrap_err();
            assert!(err.contains("'jvmci_trace_level'"));
            assert!(err.contains("'enable_jvmci' must be enabled"));
        })
    }

    #[test]
    fn split_lib_args() {
        serial_test(|| {
            let mut options = Options::default();
            options.set_from_str("jvmci_lib_args", "-Xmx1g  -Dfoo=bar ");
            assert_eq!(options.lib_args(), vec!["-Xmx1g", "-Dfoo=bar"]);
            options.set_from_str("jvmci_lib_args_sep", ",");
            options.set_from_str("jvmci_lib_args", ",a,,b c,");
            assert_eq!(options.lib_args(), vec!["a", "b c"]);
        })
    }
}
