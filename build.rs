// build.rs

fn main() {
    // Record the package version, enabled features and the git commit so that the runtime
    // can report exactly which build is embedded in the VM. See `crate::build_info`.
    built::write_built_file().expect("Failed to acquire build-time information");
}
